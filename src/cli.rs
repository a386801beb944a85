//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

use crate::config::DaemonConfig;

/// Options for the patchd demo login daemon
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Login-side client patch delivery daemon")]
pub struct DaemonOpts {
    /// TOML configuration file
    #[arg(long, default_value = "patchd.toml")]
    pub config: PathBuf,

    /// Bind address (host:port), overrides the config file
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory holding <locale><build>.<ext> patch files
    #[arg(long)]
    pub patch_dir: Option<PathBuf>,

    /// Clients below this build are offered a patch
    #[arg(long)]
    pub min_build: Option<u32>,

    /// Bytes per DATA frame (clamped to 100..=65535)
    #[arg(long)]
    pub chunk_size: Option<u32>,

    /// Enable patching regardless of the config file
    #[arg(long)]
    pub enable: bool,

    /// Append transfer events to this file
    #[arg(long)]
    pub transfer_log: Option<PathBuf>,

    /// Print the loaded patches and exit
    #[arg(long)]
    pub list: bool,

    /// Debug-level diagnostics
    #[arg(short, long)]
    pub verbose: bool,
}

impl DaemonOpts {
    /// Fold command-line overrides into a loaded config
    pub fn apply(&self, cfg: &mut DaemonConfig) {
        if let Some(bind) = &self.bind {
            cfg.bind = bind.clone();
        }
        if let Some(dir) = &self.patch_dir {
            cfg.patching.directory = dir.clone();
        }
        if let Some(build) = self.min_build {
            cfg.patching.min_build = build;
        }
        if let Some(chunk) = self.chunk_size {
            cfg.patching.chunk_size = chunk;
        }
        if self.enable {
            cfg.patching.enabled = true;
        }
        if let Some(log) = &self.transfer_log {
            cfg.transfer_log = Some(log.clone());
        }
    }
}

/// Options for the patchget client
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Fetch a client patch from a patchd server")]
pub struct FetchOpts {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 3724)]
    pub port: u16,

    /// Build number to report
    #[arg(long)]
    pub build: u32,

    /// Four-letter locale to report (e.g. enGB)
    #[arg(long, default_value = "enUS")]
    pub locale: String,

    /// Where to write the patch; an existing partial file is resumed
    #[arg(short, long, default_value = "wow-patch.mpq")]
    pub output: PathBuf,
}
