use actix_web::{middleware::Logger, web, App, HttpServer};
use std::future::Future;
use tracing::{error, info, instrument};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::comm::enhanced_config::EnhancedConfigManager;
use crate::comm::tracing::init_tracing;
use crate::error::{AppError, AppResult};
use crate::route_registry::{configure_routes, RouteRegistry};
use crate::server::RealtimeServer;

/// 应用启动器 / Application bootstrap
///
/// 初始化日志、恢复房间成员，然后并行运行 WebSocket 与 HTTP 监听。
/// Initialises logging, restores room membership, then runs the WebSocket and
/// HTTP listeners side by side.
pub struct AppBootstrap {
    config: EnhancedConfigManager,
}

impl AppBootstrap {
    pub fn new(config: EnhancedConfigManager) -> Self {
        Self { config }
    }

    /// 运行应用服务器
    #[instrument(skip(self))]
    pub async fn run(self) -> AppResult<()> {
        let settings = self.config.settings().clone();
        init_tracing(&settings.logging)?;
        self.config.print_config_summary();

        let server = RealtimeServer::new(settings.clone());
        server.restore().await?;

        let ws_server = server.clone();
        let ws_host = settings.server.host.clone();
        let ws_port = settings.server.ws_port;
        let ws_listener = async move { ws_server.run_ws(&ws_host, ws_port).await.map_err(AppError::Internal) };

        RouteRegistry::realtime().log_routes_info();
        let http_listener =
            self.start_http_server(server, &settings.server.host, settings.server.http_port, settings.server.workers);
        let result = serve_until_failure(http_listener, ws_listener).await;

        match result {
            Ok(()) => {
                info!("服务器已停止 / server stopped");
                Ok(())
            }
            Err(e) => {
                error!("服务器启动失败: {}", e);
                Err(e)
            }
        }
    }

    /// 启动HTTP服务器
    async fn start_http_server(
        &self,
        server: RealtimeServer,
        host: &str,
        port: u16,
        workers: Option<usize>,
    ) -> AppResult<()> {
        let data = web::Data::new(server);
        let mut http = HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .app_data(data.clone())
                // 集成 Swagger UI 文档（使用通配路径以兼容静态资源与尾随斜杠）
                .service(
                    SwaggerUi::new("/swagger-ui/{_:.*}")
                        .url("/api-doc/openapi.json", crate::api::swagger::ApiDoc::openapi()),
                )
                .configure(configure_routes)
        });
        if let Some(workers) = workers {
            http = http.workers(workers);
        }

        info!("🚀 v-realtime HTTP server starting on {}:{}", host, port);
        http.bind((host, port))
            .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?
            .run()
            .await
            .map_err(|e| AppError::Internal(anyhow::Error::new(e)))?;
        Ok(())
    }
}

/// 两个监听器一起运行，任一退出即返回 / Run both listeners; stop when either one exits
///
/// WebSocket 监听器不会正常结束，它的退出总是错误。
/// The WebSocket listener never finishes on its own, so its exit is always an error.
pub(crate) async fn serve_until_failure<H, W>(http: H, ws: W) -> AppResult<()>
where
    H: Future<Output = AppResult<()>>,
    W: Future<Output = AppResult<()>>,
{
    tokio::select! {
        result = http => result,
        result = ws => {
            let e = result
                .err()
                .unwrap_or_else(|| AppError::Internal(anyhow::anyhow!("WebSocket listener exited")));
            error!("❌ WebSocket server stopped: {}", e);
            Err(e)
        }
    }
}
