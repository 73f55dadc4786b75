use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ParleyConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub shm: ShmSection,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerSection {
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,
    #[serde(default = "defaults::port")]
    pub port: u16,
    #[serde(default = "defaults::welcome_text")]
    pub welcome_text: String,
    /// Read timeout on client sockets; bounds how long a worker takes to notice shutdown.
    #[serde(default = "defaults::read_poll_ms")]
    pub read_poll_ms: u64,
    /// Upper bound on a single send to one client.
    #[serde(default = "defaults::write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "defaults::max_line_bytes")]
    pub max_line_bytes: usize,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShmSection {
    #[serde(default = "defaults::shm_dir")]
    pub shm_dir: String,
    #[serde(default = "defaults::shm_name")]
    pub shm_name: String,
    #[serde(default = "defaults::mutex_sem")]
    pub mutex_sem: String,
    #[serde(default = "defaults::free_sem")]
    pub free_sem: String,
    #[serde(default = "defaults::filled_sem")]
    pub filled_sem: String,
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn bind_addr() -> String {
        "0.0.0.0".into()
    }

    pub fn port() -> u16 {
        5000
    }

    pub fn welcome_text() -> String {
        "Please send your username".into()
    }

    pub fn read_poll_ms() -> u64 {
        250
    }

    pub fn write_timeout_ms() -> u64 {
        2000
    }

    pub fn max_line_bytes() -> usize {
        8192
    }

    pub fn shm_dir() -> String {
        "/dev/shm".into()
    }

    pub fn shm_name() -> String {
        "/os_chat_shm".into()
    }

    pub fn mutex_sem() -> String {
        "/os_chat_mutex".into()
    }

    pub fn free_sem() -> String {
        "/os_chat_empty".into()
    }

    pub fn filled_sem() -> String {
        "/os_chat_full".into()
    }

    pub fn capacity() -> usize {
        64
    }
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            server: ServerSection::default(),
            shm: ShmSection::default(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            port: defaults::port(),
            welcome_text: defaults::welcome_text(),
            read_poll_ms: defaults::read_poll_ms(),
            write_timeout_ms: defaults::write_timeout_ms(),
            max_line_bytes: defaults::max_line_bytes(),
        }
    }
}

impl Default for ShmSection {
    fn default() -> Self {
        Self {
            shm_dir: defaults::shm_dir(),
            shm_name: defaults::shm_name(),
            mutex_sem: defaults::mutex_sem(),
            free_sem: defaults::free_sem(),
            filled_sem: defaults::filled_sem(),
            capacity: defaults::capacity(),
        }
    }
}

impl ParleyConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load `path` when given, otherwise use the built-in defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = ParleyConfig::parse("").unwrap();
        assert_eq!(cfg, ParleyConfig::default());
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.shm.capacity, 64);
        assert_eq!(cfg.shm.shm_name, "/os_chat_shm");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = ParleyConfig::parse(
            r#"
            log_level = "debug"
            [server]
            port = 6000
            [shm]
            shm_name = "/room"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.server.port, 6000);
        assert_eq!(cfg.server.welcome_text, "Please send your username");
        assert_eq!(cfg.shm.shm_name, "/room");
        assert_eq!(cfg.shm.free_sem, "/os_chat_empty");
    }

    #[test]
    fn bad_types_fail_to_parse() {
        let err = ParleyConfig::parse("[server]\nport = \"five\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = ParleyConfig::load("/nonexistent/parley.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
