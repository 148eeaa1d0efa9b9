//! Command line interface of the `media-range` binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::config::Config;

/// Upload media and play it back with HTTP range requests.
#[derive(Debug, Parser)]
#[command(name = "media-range", version, long_about = None)]
pub struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, short, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    /// Port to listen on, replacing the port of the bind address.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Directory holding uploaded media.
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Bytes read from disk per response chunk.
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// Largest accepted upload, in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_upload_bytes: Option<u64>,
}

impl Cli {
    /// Loads the config file, if any, and applies the flags on top.
    pub fn into_config(self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if let Some(port) = self.port {
            cfg.bind.set_port(port);
        }
        if let Some(root) = self.root {
            cfg.store_root = root;
        }
        if let Some(chunk_size) = self.chunk_size {
            cfg.chunk_size = chunk_size;
        }
        if let Some(max) = self.max_upload_bytes {
            cfg.max_upload_bytes = max;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
