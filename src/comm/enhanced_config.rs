use crate::comm::config::{ConfigError, ConfigManager, ConfigSource, ENV_PREFIX};
use crate::comm::config_validator::{ConfigValidator, EnvironmentConfigLoader, RealtimeSettings};
use config::FileFormat;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

/// 增强的配置管理器：分层加载 + 校验 / Layered loading plus validation
pub struct EnhancedConfigManager {
    config_manager: Arc<ConfigManager>,
    env_loader: EnvironmentConfigLoader,
    settings: RealtimeSettings,
}

impl EnhancedConfigManager {
    /// 加载并校验 / Build from the environment's files plus extra sources (highest priority)
    pub fn load(
        env_loader: EnvironmentConfigLoader,
        config_file: Option<&str>,
        overrides: Vec<ConfigSource>,
    ) -> Result<Self, ConfigError> {
        info!("当前环境: {}", env_loader.get_environment());

        let mut sources: Vec<ConfigSource> = env_loader
            .get_config_paths()
            .into_iter()
            .map(|path| ConfigSource::File { path, format: Some(FileFormat::Toml), required: false })
            .collect();
        if let Some(path) = config_file {
            sources.push(ConfigSource::File {
                path: path.to_string(),
                format: None,
                required: true,
            });
        }
        sources.push(ConfigSource::Env { prefix: ENV_PREFIX.to_string(), separator: "__" });
        sources.extend(overrides);

        let config_manager = Arc::new(
            ConfigManager::with_sources(sources)
                .map_err(|e| ConfigError::InitializationError { message: e.to_string() })?,
        );
        let settings = Self::load_settings(&config_manager)?;
        ConfigValidator::new().validate_config(&settings)?;

        info!("配置加载和验证成功");
        debug!("应用配置: {:?}", Self::masked(&settings));

        Ok(Self { config_manager, env_loader, settings })
    }

    /// 逐项读取，缺失项使用默认值 / Read each key; missing keys keep defaults
    fn load_settings(manager: &ConfigManager) -> Result<RealtimeSettings, ConfigError> {
        let mut settings = RealtimeSettings::default();

        read_into(manager, "server.host", &mut settings.server.host)?;
        read_into(manager, "server.http_port", &mut settings.server.http_port)?;
        read_into(manager, "server.ws_port", &mut settings.server.ws_port)?;
        if let Some(workers) = read_optional::<usize>(manager, "server.workers")? {
            settings.server.workers = Some(workers);
        }
        read_into(manager, "auth.deadline_ms", &mut settings.auth.deadline_ms)?;
        read_into(manager, "auth.shared_secret", &mut settings.auth.shared_secret)?;
        read_into(manager, "pagination.default_page_size", &mut settings.pagination.default_page_size)?;
        read_into(manager, "pagination.max_page_size", &mut settings.pagination.max_page_size)?;
        read_into(manager, "delivery.flush_batch", &mut settings.delivery.flush_batch)?;
        read_into(manager, "logging.level", &mut settings.logging.level)?;
        read_into(manager, "logging.json_format", &mut settings.logging.json_format)?;

        Ok(settings)
    }

    /// 获取应用配置
    pub fn settings(&self) -> &RealtimeSettings {
        &self.settings
    }

    /// 覆盖监听地址（命令行参数）/ Apply CLI listener overrides, then revalidate
    pub fn override_listeners(
        &mut self,
        host: Option<String>,
        http_port: Option<u16>,
        ws_port: Option<u16>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = host {
            self.settings.server.host = host;
        }
        if let Some(port) = http_port {
            self.settings.server.http_port = port;
        }
        if let Some(port) = ws_port {
            self.settings.server.ws_port = port;
        }
        ConfigValidator::new().validate_config(&self.settings)
    }

    /// 打印配置摘要
    pub fn print_config_summary(&self) {
        let s = &self.settings;
        info!("=== 配置摘要 ===");
        info!("环境: {}", self.env_loader.get_environment());
        info!("HTTP: {}:{}", s.server.host, s.server.http_port);
        info!("WebSocket: {}:{}", s.server.host, s.server.ws_port);
        info!("工作线程: {:?}", s.server.workers);
        info!("认证时限: {} ms", s.auth.deadline_ms);
        info!(
            "分页: 默认 {} / 最大 {}",
            s.pagination.default_page_size, s.pagination.max_page_size
        );
        info!("日志级别: {} (JSON: {})", s.logging.level, s.logging.json_format);
        self.config_manager.log_sources_info();
    }

    fn masked(settings: &RealtimeSettings) -> RealtimeSettings {
        let mut copy = settings.clone();
        copy.auth.shared_secret = "***".to_string();
        copy
    }
}

fn read_optional<T: DeserializeOwned>(manager: &ConfigManager, key: &str) -> Result<Option<T>, ConfigError> {
    match manager.get_safe(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::KeyNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_into<T: DeserializeOwned>(manager: &ConfigManager, key: &str, slot: &mut T) -> Result<(), ConfigError> {
    if let Some(value) = read_optional(manager, key)? {
        *slot = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn loader() -> EnvironmentConfigLoader {
        EnvironmentConfigLoader::with_environment("unit-test")
    }

    #[test]
    fn test_overrides_apply_on_top_of_defaults() {
        let mut map = HashMap::new();
        map.insert("server.ws_port".to_string(), serde_json::json!(6200));
        map.insert("pagination.max_page_size".to_string(), serde_json::json!(50));
        let manager = EnhancedConfigManager::load(loader(), None, vec![ConfigSource::Memory(map)]).unwrap();
        assert_eq!(manager.settings().server.ws_port, 6200);
        assert_eq!(manager.settings().pagination.max_page_size, 50);
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let source = ConfigSource::String {
            content: "[logging]\nlevel = \"loud\"".to_string(),
            format: FileFormat::Toml,
        };
        let result = EnhancedConfigManager::load(loader(), None, vec![source]);
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_wrong_type_is_reported() {
        let source = ConfigSource::String {
            content: "[server]\nhttp_port = \"not-a-port\"".to_string(),
            format: FileFormat::Toml,
        };
        let result = EnhancedConfigManager::load(loader(), None, vec![source]);
        assert!(matches!(result, Err(ConfigError::TypeConversionError { .. })));
    }

    #[test]
    fn test_cli_override_revalidates() {
        let mut manager = EnhancedConfigManager::load(loader(), None, vec![]).unwrap();
        manager.override_listeners(None, Some(9000), None).unwrap();
        assert_eq!(manager.settings().server.http_port, 9000);
        let ws_port = manager.settings().server.ws_port;
        assert!(manager.override_listeners(None, Some(ws_port), None).is_err());
    }
}
