mod config;

pub use config::{ConfigError, ParleyConfig, ServerSection, ShmSection};
