use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use patchgate::cli::FetchOpts;
use patchgate::client::{self, FetchOptions, FetchOutcome};

fn main() -> Result<()> {
    let opts = FetchOpts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.green} {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let fetch_opts = FetchOptions {
        build: opts.build,
        locale: opts.locale.clone(),
        dest: opts.output.clone(),
        max_bytes: None,
    };
    let outcome = rt.block_on(client::fetch(&opts.host, opts.port, &fetch_opts, |offset, total| {
        bar.set_length(total);
        bar.set_position(offset);
    }))?;

    match outcome {
        FetchOutcome::UpToDate => {
            bar.finish_and_clear();
            println!("Client build {} is up to date", opts.build);
        }
        FetchOutcome::Complete { file_size, resumed_from, .. } => {
            bar.finish();
            if resumed_from > 0 {
                println!("Resumed at {} bytes", resumed_from);
            }
            println!("Saved {} ({} bytes, hash verified)", opts.output.display(), file_size);
        }
        FetchOutcome::Interrupted { offset, file_size } => {
            bar.abandon();
            println!("Interrupted at {}/{} bytes; run again to resume", offset, file_size);
        }
    }
    Ok(())
}
