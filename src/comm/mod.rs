pub mod config;
pub mod config_validator;
pub mod enhanced_config;
pub mod tracing;
