//! Persistent volume configuration.
//!
//! Written once at volume creation as `config.json` inside the volume
//! directory and immutable thereafter. `reset()` preserves it; only the
//! secure-erase truncate path rewrites it (with identical contents).

use crate::error::{Result, VolumeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current on-disk format version.
pub const VOLUME_FORMAT_VERSION: u32 = 1;

/// Block size used when the device options leave it unset.
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Name of the configuration file inside a volume directory.
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub version: u32,
    pub block_size: u32,
}

impl VolumeConfig {
    pub fn new(block_size: u32) -> Self {
        Self {
            version: VOLUME_FORMAT_VERSION,
            block_size,
        }
    }

    /// Load and validate the configuration of an existing volume.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VolumeError::NotAVolume(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let config: VolumeConfig = serde_json::from_slice(&raw)?;
        if config.version > VOLUME_FORMAT_VERSION {
            return Err(VolumeError::UnsupportedVersion(config.version));
        }
        Ok(config)
    }

    /// Write the configuration into a volume directory.
    pub async fn persist(&self, dir: &Path) -> Result<()> {
        let raw = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(dir.join(CONFIG_FILE), raw).await?;
        Ok(())
    }
}
