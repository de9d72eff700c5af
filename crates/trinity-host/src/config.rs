use anyhow::{anyhow, Context, Result};
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Host settings, read from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directories scanned for `*.wasm` modules.
    pub modules_paths: Vec<PathBuf>,
    /// Longest log line accepted from a module, in bytes.
    pub max_log_len: usize,
    /// Only this sender may run `!admin` commands.
    pub admin_user_id: Option<String>,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            modules_paths: vec![PathBuf::from("modules")],
            max_log_len: 4096,
            admin_user_id: None,
            log_filter: "info".to_string(),
        }
    }
}

impl HostConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?,
                FileFormat::Toml,
            ))
            .build()
            .with_context(|| format!("reading config {}", path.display()))?;

        Ok(config.try_deserialize()?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
