use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use patchgate::checksum::to_hex;
use patchgate::cli::DaemonOpts;
use patchgate::config::DaemonConfig;
use patchgate::logger::{TextLogger, TracingLogger, TransferLogger};
use patchgate::{server, PatchService};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let default_level = if opts.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut cfg = DaemonConfig::load(&opts.config)?;
    opts.apply(&mut cfg);

    let logger: Arc<dyn TransferLogger> = match &cfg.transfer_log {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("Failed to open transfer log {}", path.display()))?,
        ),
        None => Arc::new(TracingLogger),
    };

    let service = Arc::new(PatchService::new(cfg.patching.clone(), logger));

    if opts.list {
        service.set_enabled(true);
        service.reload();
        for patch in service.registry().snapshot().iter() {
            println!(
                "{:<6} {:>6} {:>12}  {}  {}",
                patch.locale,
                patch.build,
                patch.file_size,
                to_hex(&patch.hash),
                patch.path.display()
            );
        }
        return Ok(());
    }

    service.start();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        service.spawn_ticker(Duration::from_millis(cfg.tick_interval_ms));
        tokio::select! {
            res = server::serve(&cfg.bind, Arc::clone(&service)) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })?;

    service.shutdown();
    Ok(())
}
