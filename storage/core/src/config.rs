use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{BithordeError, Result};

/// Top-level server configuration. Parsing this out of a config file or
/// argv is the caller's job; this crate only defines the shape and
/// validates it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_size_mb: Option<u64>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub friends: Vec<FriendConfig>,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default)]
    pub router: RouterConfig,
}

fn default_parallel() -> usize {
    crate::dispatch::PARALLEL_HASH_JOBS
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendConfig {
    pub name: String,
    pub addr: String,
    pub port: u16,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub cipher: Option<String>,
}

/// Router tunables kept out of hardcoded constants (see DESIGN.md open
/// question 3) so they can be set from configuration instead.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u32,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_interval_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            default_timeout_ms: default_timeout_ms(),
            reconnect_interval_secs: default_reconnect_secs(),
        }
    }
}

fn default_timeout_ms() -> u32 {
    30_000
}

fn default_reconnect_secs() -> u64 {
    5
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parallel == 0 {
            return Err(BithordeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "parallel must be >= 1",
            )));
        }
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(BithordeError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "source name must not be empty",
                )));
            }
        }
        for friend in &self.friends {
            if friend.name.is_empty() {
                return Err(BithordeError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "friend name must not be empty",
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_parallelism() {
        let cfg = ServerConfig {
            cache_dir: None,
            cache_size_mb: None,
            sources: vec![],
            friends: vec![],
            parallel: 0,
            router: RouterConfig::default(),
        };
        assert!(cfg.validate().is_err());
    }
}
