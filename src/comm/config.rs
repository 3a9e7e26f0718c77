use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// 环境变量前缀 / Environment variable prefix (`VRT_SERVER__HTTP_PORT=8081`)
pub const ENV_PREFIX: &str = "VRT";

/// 配置错误类型 / Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置文件不存在 / config file not found: {path}")]
    FileNotFound { path: String },
    #[error("配置项 '{key}' 不存在 / key not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败 / type conversion failed: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置项 '{key}' 校验失败 / validation failed: {message}")]
    ValidationFailed { key: String, message: String },
    #[error("配置初始化失败 / initialization failed: {message}")]
    InitializationError { message: String },
}

impl ConfigError {
    pub fn validation<K: Into<String>, M: Into<String>>(key: K, message: M) -> Self {
        Self::ValidationFailed { key: key.into(), message: message.into() }
    }
}

/// 配置数据源信息 / Config source description
#[derive(Debug, Clone)]
pub struct ConfigSourceInfo {
    pub source_type: String,
    pub description: String,
    pub priority: u8,
    pub loaded: bool,
}

/// 配置源类型 / Config source
pub enum ConfigSource {
    /// 文件配置源
    File { path: String, format: Option<FileFormat>, required: bool },
    /// 环境变量配置源
    Env { prefix: String, separator: &'static str },
    /// 内存配置源（点分 key）/ In-memory source keyed by dotted paths
    Memory(HashMap<String, serde_json::Value>),
    /// 字符串配置源
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    /// 获取配置源信息
    pub fn get_source_info(&self, priority: u8) -> ConfigSourceInfo {
        let (source_type, description) = match self {
            ConfigSource::File { path, required, .. } => {
                ("File", format!("文件配置源: {} (必需: {})", path, required))
            }
            ConfigSource::Env { prefix, separator } => {
                ("Environment", format!("环境变量配置源: 前缀={}, 分隔符={}", prefix, separator))
            }
            ConfigSource::Memory(map) => ("Memory", format!("内存配置源: {} 个配置项", map.len())),
            ConfigSource::String { .. } => ("String", "字符串配置源".to_string()),
        };
        ConfigSourceInfo {
            source_type: source_type.to_string(),
            description,
            priority,
            loaded: false,
        }
    }

    pub fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File { path, format, required } => {
                let file_source = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                Ok(builder.add_source(file_source.required(required)))
            }
            ConfigSource::Env { prefix, separator } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator(separator)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .ignore_empty(true),
            )),
            ConfigSource::Memory(map) => {
                let mut builder = builder;
                for (key, value) in map {
                    builder = builder
                        .set_override(key.as_str(), json_to_config_value(value))
                        .map_err(|e| anyhow!("设置内存配置 '{}' 失败: {}", key, e))?;
                }
                Ok(builder)
            }
            ConfigSource::String { content, format } => {
                Ok(builder.add_source(File::from_str(&content, format)))
            }
        }
    }
}

fn json_to_config_value(value: serde_json::Value) -> config::Value {
    use serde_json::Value;
    match value {
        Value::Bool(b) => config::Value::from(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => config::Value::from(i),
            None => config::Value::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => config::Value::from(s),
        Value::Array(items) => config::Value::from(
            items.into_iter().map(json_to_config_value).collect::<Vec<config::Value>>(),
        ),
        other => config::Value::from(other.to_string()),
    }
}

/// 配置管理器 / Layered configuration manager
pub struct ConfigManager {
    config: Config,
    sources_info: Vec<ConfigSourceInfo>,
}

impl ConfigManager {
    /// 使用指定的配置源（后添加者优先）/ Build from sources, later ones win
    pub fn with_sources(sources: Vec<ConfigSource>) -> Result<Self> {
        let mut builder = Config::builder();
        let mut sources_info = Vec::new();

        for (index, source) in sources.into_iter().enumerate() {
            let info = source.get_source_info(index as u8 + 1);

            if let ConfigSource::File { path, required, .. } = &source {
                let exists = std::path::Path::new(path).exists();
                if !exists && *required {
                    return Err(anyhow!(ConfigError::FileNotFound { path: path.clone() }));
                }
                if !exists {
                    sources_info.push(info);
                    continue;
                }
            }

            builder = source
                .add_to_builder(builder)
                .map_err(|e| anyhow!("添加配置源失败: {}", e))?;
            sources_info.push(ConfigSourceInfo { loaded: true, ..info });
        }

        let config = builder.build().map_err(|e| anyhow!("构建配置失败: {}", e))?;
        Ok(Self { config, sources_info })
    }

    /// 安全获取配置值，区分缺失与类型错误 / Distinguishes missing keys from bad types
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| match e {
            config::ConfigError::NotFound(_) => ConfigError::KeyNotFound { key: key.to_string() },
            other => ConfigError::TypeConversionError {
                key: key.to_string(),
                message: other.to_string(),
            },
        })
    }

    /// 配置源统计 / (total, loaded, skipped)
    pub fn get_sources_stats(&self) -> (usize, usize, usize) {
        let total = self.sources_info.len();
        let loaded = self.sources_info.iter().filter(|info| info.loaded).count();
        (total, loaded, total - loaded)
    }

    /// 记录配置源详细信息 / Log loaded sources
    pub fn log_sources_info(&self) {
        for info in &self.sources_info {
            let status = if info.loaded { "✓ 已加载" } else { "✗ 跳过" };
            tracing::info!(
                priority = info.priority,
                "{} {} - {}",
                status,
                info.source_type,
                info.description
            );
        }
        let (total, loaded, skipped) = self.get_sources_stats();
        tracing::info!("配置源: 总计 {}，加载 {}，跳过 {}", total, loaded, skipped);
    }
}
