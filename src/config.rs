use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::stream::DEFAULT_CHUNK_SIZE;

/// Server configuration, optionally read from a TOML file.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,
    /// Directory holding uploaded media. Created on startup.
    pub store_root: PathBuf,
    /// Maximum number of bytes read from disk per response chunk.
    pub chunk_size: usize,
    /// Largest accepted upload request body, in bytes.
    pub max_upload_bytes: u64,
    /// File extensions accepted for upload, without the dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            store_root: PathBuf::from("uploads"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_upload_bytes: 4 * 1024 * 1024 * 1024,
            allowed_extensions: ["mp4", "webm", "ogg", "mov", "mkv"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Config {
    /// Reads a config file. Missing keys take their default value.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Config = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.chunk_size >= 1, "chunk_size must be at least 1");
        Ok(())
    }
}
