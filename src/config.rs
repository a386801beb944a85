//! Daemon and patching configuration (TOML)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::{timeouts, MAX_CONFIGURED_CHUNK, MIN_CONFIGURED_CHUNK};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    pub enabled: bool,
    /// Clients below this build are offered a patch
    pub min_build: u32,
    pub directory: PathBuf,
    /// Requested bytes per DATA frame; see `effective_chunk_size`
    pub chunk_size: u32,
    /// Patch file extension, matched case-insensitively
    pub extension: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_build: 12340, // 3.3.5a
            directory: PathBuf::from("ClientPatches"),
            chunk_size: 1500,
            extension: "mpq".to_string(),
        }
    }
}

impl PatchConfig {
    /// Chunk size clamped to what the wire format and the tick budget allow
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CONFIGURED_CHUNK, MAX_CONFIGURED_CHUNK) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    pub tick_interval_ms: u64,
    /// Optional append-only transfer event log
    pub transfer_log: Option<PathBuf>,
    pub patching: PatchConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3724".to_string(),
            tick_interval_ms: timeouts::TICK_MS,
            transfer_log: None,
            patching: PatchConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Read a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&data).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: DaemonConfig = toml::from_str(data)?;
        if cfg.tick_interval_ms == 0 {
            anyhow::bail!("tick_interval_ms must be greater than zero");
        }
        Ok(cfg)
    }
}
