use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::server::RealtimeServer;

impl RealtimeServer {
    /// 启动 WebSocket 监听 / Run the WebSocket accept loop
    pub async fn run_ws(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 v-realtime WebSocket server starting on {}", addr);

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::ws::connection::handle_connection(stream, peer_addr, server).await {
                    error!("Error handling connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}
