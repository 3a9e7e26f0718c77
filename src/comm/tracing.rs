use anyhow::{anyhow, Result};
use chrono::{Datelike, Timelike};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::comm::config_validator::LoggingSettings;

struct LogTimer;

impl fmt::time::FormatTime for LogTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Local::now();
        let cs = now.timestamp_subsec_millis() / 10;
        let s = format!(
            "{:04}-{:02}-{:02}:{:02}:{:02}:{:02}:{:02}",
            now.year(),
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            cs
        );
        w.write_str(&s)
    }
}

/// 初始化日志 / Install the global subscriber
///
/// `RUST_LOG` 优先于配置的级别。JSON 模式输出 bunyan 格式，否则输出紧凑文本。
/// 已安装全局订阅者时直接返回。
/// `RUST_LOG` wins over the configured level. JSON mode emits bunyan records,
/// otherwise compact text lines. A second call is a no-op.
pub fn init_tracing(logging: &LoggingSettings) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if logging.json_format {
        let formatting_layer = BunyanFormattingLayer::new("v-realtime".into(), std::io::stdout);
        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(formatting_layer);
        tracing::subscriber::set_global_default(subscriber).map_err(|e| anyhow!(e))
    } else {
        fmt::SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_timer(LogTimer)
            .compact()
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!(e))
    };

    match installed {
        // 并发初始化时另一方已安装 / another caller won the race
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(anyhow!("设置日志订阅者失败: {}", e)),
        Ok(()) => Ok(()),
    }
}
