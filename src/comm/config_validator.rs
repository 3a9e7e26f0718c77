use serde::{Deserialize, Serialize};

use crate::comm::config::ConfigError;

/// 服务器配置 / Server listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub workers: Option<usize>,
}

/// 握手认证配置 / Handshake authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// 连接后必须完成认证的时限 / Time allowed to send `connect` after the socket opens
    pub deadline_ms: u64,
    pub shared_secret: String,
}

/// 分页配置 / Page size bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationSettings {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

/// 投递配置 / Delivery tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// 重连补发时每批读取的待投递记录数 / Pending records read per flush batch
    pub flush_batch: usize,
}

/// 日志配置 / Logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub json_format: bool,
}

/// 应用配置结构体 / Resolved application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub pagination: PaginationSettings,
    pub delivery: DeliverySettings,
    pub logging: LoggingSettings,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                http_port: 8080,
                ws_port: 5200,
                workers: Some(4),
            },
            auth: AuthSettings {
                deadline_ms: 10_000,
                shared_secret: "change-me".to_string(),
            },
            pagination: PaginationSettings { default_page_size: 20, max_page_size: 100 },
            delivery: DeliverySettings { flush_batch: 100 },
            logging: LoggingSettings { level: "info".to_string(), json_format: false },
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 配置验证器 / Settings validator
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// 验证整个配置
    pub fn validate_config(&self, settings: &RealtimeSettings) -> Result<(), ConfigError> {
        if settings.server.host.trim().is_empty() {
            return Err(ConfigError::validation("server.host", "服务器主机不能为空"));
        }
        if settings.server.http_port == 0 || settings.server.ws_port == 0 {
            return Err(ConfigError::validation("server", "端口不能为0"));
        }
        if settings.server.http_port == settings.server.ws_port {
            return Err(ConfigError::validation(
                "server.ws_port",
                "WebSocket端口不能与HTTP端口相同",
            ));
        }
        if let Some(workers) = settings.server.workers {
            if workers == 0 || workers > 32 {
                return Err(ConfigError::validation("server.workers", "工作线程数必须在1-32范围内"));
            }
        }

        if settings.auth.deadline_ms < 100 || settings.auth.deadline_ms > 300_000 {
            return Err(ConfigError::validation(
                "auth.deadline_ms",
                "认证时限必须在100-300000毫秒范围内",
            ));
        }
        if settings.auth.shared_secret.len() < 8 {
            return Err(ConfigError::validation("auth.shared_secret", "共享密钥至少8个字符"));
        }

        let pagination = &settings.pagination;
        if pagination.max_page_size == 0 || pagination.max_page_size > 1000 {
            return Err(ConfigError::validation(
                "pagination.max_page_size",
                "最大分页大小必须在1-1000范围内",
            ));
        }
        if pagination.default_page_size == 0 || pagination.default_page_size > pagination.max_page_size {
            return Err(ConfigError::validation(
                "pagination.default_page_size",
                "默认分页大小必须在1到最大分页大小之间",
            ));
        }

        if settings.delivery.flush_batch == 0 {
            return Err(ConfigError::validation("delivery.flush_batch", "补发批大小必须大于0"));
        }

        if !LOG_LEVELS.contains(&settings.logging.level.as_str()) {
            return Err(ConfigError::validation(
                "logging.level",
                format!("值必须是以下之一: {}", LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }
}

/// 环境特定配置加载器 / Resolves the run environment from `VRT_ENV`
pub struct EnvironmentConfigLoader {
    environment: String,
}

impl EnvironmentConfigLoader {
    pub fn new() -> Self {
        let environment = std::env::var("VRT_ENV").unwrap_or_else(|_| "development".to_string());
        Self { environment }
    }

    pub fn with_environment(environment: &str) -> Self {
        Self { environment: environment.to_string() }
    }

    /// 获取当前环境
    pub fn get_environment(&self) -> &str {
        &self.environment
    }

    /// 环境特定的配置文件路径（低优先级在前）/ Config files, lowest priority first
    pub fn get_config_paths(&self) -> Vec<String> {
        vec![
            "config/default.toml".to_string(),
            format!("config/{}.toml", self.environment),
            "config/local.toml".to_string(),
        ]
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for EnvironmentConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
