use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::server::RealtimeServer;
use crate::ws::handler::Session;
use crate::ws::sender::send_close;

/// 处理新连接 / Handle a new socket
///
/// 写端由独立任务驱动；未在 `auth.deadline_ms` 内完成 `connect` 的连接会被关闭。
/// The writer runs in its own task. A socket that has not sent a valid `connect`
/// within `auth.deadline_ms` is closed.
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, server: RealtimeServer) -> Result<()> {
    tracing::info!("📨 New connection from: {}", peer_addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = Uuid::new_v4().to_string();

    let writer_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                tracing::error!("Failed to send message to {}: {}", writer_id, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let deadline_ms = server.settings.auth.deadline_ms;
    let mut session = Session::new(server, &connection_id, tx.clone());

    let authenticated = session.auth_flag();
    let watchdog_id = connection_id.clone();
    let watchdog = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(deadline_ms)).await;
        if !authenticated.load(Ordering::Acquire) {
            send_close(&tx, "authentication timeout");
            tracing::warn!("disconnecting unauthenticated connection_id={}", watchdog_id);
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(message) => {
                if !session.handle_message(message).await {
                    break;
                }
            }
            Err(e) => {
                tracing::error!("WebSocket error from {}: {}", connection_id, e);
                break;
            }
        }
    }

    watchdog.abort();
    session.close();
    send_task.abort();
    tracing::info!("👋 Connection {} disconnected", connection_id);
    Ok(())
}
