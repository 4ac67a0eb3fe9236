//! Server configuration: an optional TOML file, then command-line overrides.

use crate::error::{OhmserveError, Result};
use crate::stream::StreamLimits;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Root under which each run handle gets its staging directory.
    pub work_dir: PathBuf,
    /// Per-channel bound on undelivered samples. Unbounded when absent.
    pub max_buffered_samples: Option<usize>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5923)),
            work_dir: PathBuf::from("./ohmserve-work"),
            max_buffered_samples: None,
            log_filter: "info".to_string(),
        }
    }
}

/// Values given on the command line. `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<SocketAddr>,
    pub work_dir: Option<PathBuf>,
    pub max_buffered_samples: Option<usize>,
    pub log_filter: Option<String>,
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OhmserveError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| OhmserveError::Config(e.to_string()))
    }

    /// Load `path` if given, otherwise start from defaults, then apply
    /// `overrides`.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        if config.max_buffered_samples == Some(0) {
            return Err(OhmserveError::Config(
                "max_buffered_samples must be at least 1".into(),
            ));
        }
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(work_dir) = overrides.work_dir {
            self.work_dir = work_dir;
        }
        if let Some(limit) = overrides.max_buffered_samples {
            self.max_buffered_samples = Some(limit);
        }
        if let Some(filter) = overrides.log_filter {
            self.log_filter = filter;
        }
    }

    pub fn stream_limits(&self) -> StreamLimits {
        StreamLimits {
            max_buffered_samples: self.max_buffered_samples,
        }
    }
}
