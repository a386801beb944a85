//! Receiving side of the XFER protocol, used by `patchget` and the e2e tests

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::checksum::{file_digest, to_hex};
use crate::protocol::{cmd, sizes, timeouts};
use crate::protocol_core::{decode_initiate, parse_data_header, ClientCommand, Hello};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub build: u32,
    pub locale: String,
    pub dest: PathBuf,
    /// Cancel once this many bytes arrived in this session (simulates a dropped download)
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    UpToDate,
    Complete {
        file_size: u64,
        resumed_from: u64,
        bytes_received: u64,
    },
    Interrupted {
        offset: u64,
        file_size: u64,
    },
}

pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = timeout(
        Duration::from_millis(timeouts::CONNECT_MS),
        TcpStream::connect((host, port)),
    )
    .await
    .with_context(|| format!("connect timeout {}:{}", host, port))?
    .with_context(|| format!("connect {}:{}", host, port))?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Ask the server for a patch and download it into `opts.dest`.
///
/// An existing file shorter than the offered patch is resumed from its length.
/// `on_progress(offset, file_size)` runs after every chunk.
pub async fn fetch<F>(host: &str, port: u16, opts: &FetchOptions, mut on_progress: F) -> Result<FetchOutcome>
where
    F: FnMut(u64, u64),
{
    let mut stream = connect(host, port).await?;
    let hello = Hello {
        build: opts.build,
        locale: opts.locale.clone(),
    };
    stream.write_all(&hello.encode()).await?;

    let mut first = [0u8; 1];
    read_exact_idle(&mut stream, &mut first).await?;
    match first[0] {
        cmd::UP_TO_DATE => return Ok(FetchOutcome::UpToDate),
        cmd::INITIATE => {}
        other => bail!("unexpected server frame 0x{:02x}", other),
    }
    let mut initiate = [0u8; sizes::INITIATE];
    initiate[0] = first[0];
    read_exact_idle(&mut stream, &mut initiate[1..]).await?;
    let offer = decode_initiate(&initiate)?;
    info!(bytes = offer.file_size, md5 = %to_hex(&offer.hash), "server offered patch");

    let existing = partial_len(&opts.dest).await;
    let resumed_from = if existing > 0 && existing < offer.file_size { existing } else { 0 };
    let mut out = if resumed_from > 0 {
        stream.write_all(&ClientCommand::Resume { offset: resumed_from }.encode()).await?;
        OpenOptions::new().append(true).open(&opts.dest).await?
    } else {
        stream.write_all(&ClientCommand::Accept.encode()).await?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&opts.dest)
            .await
            .with_context(|| format!("create {}", opts.dest.display()))?
    };
    debug!(resumed_from, "transfer started");

    let mut offset = resumed_from;
    let mut chunk = Vec::new();
    while offset < offer.file_size {
        if let Some(limit) = opts.max_bytes {
            if offset - resumed_from >= limit {
                out.flush().await?;
                stream.write_all(&ClientCommand::Cancel.encode()).await?;
                return Ok(FetchOutcome::Interrupted {
                    offset,
                    file_size: offer.file_size,
                });
            }
        }
        let mut header = [0u8; sizes::DATA_HEADER];
        read_exact_idle(&mut stream, &mut header).await?;
        let len = parse_data_header(&header)?;
        if offset + len as u64 > offer.file_size {
            bail!("server sent {} bytes past end of patch", offset + len as u64 - offer.file_size);
        }
        chunk.resize(len, 0);
        read_exact_idle(&mut stream, &mut chunk).await?;
        out.write_all(&chunk).await?;
        offset += len as u64;
        on_progress(offset, offer.file_size);
    }
    out.flush().await?;
    drop(out);

    let dest = opts.dest.clone();
    let digest = tokio::task::spawn_blocking(move || file_digest(&dest)).await??;
    if digest != offer.hash {
        bail!(
            "hash mismatch for {}: expected {}, got {}",
            opts.dest.display(),
            to_hex(&offer.hash),
            to_hex(&digest)
        );
    }

    Ok(FetchOutcome::Complete {
        file_size: offer.file_size,
        resumed_from,
        bytes_received: offset - resumed_from,
    })
}

async fn partial_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn read_exact_idle(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    match timeout(Duration::from_millis(timeouts::CLIENT_IDLE_MS), stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => bail!("read timeout ({} ms)", timeouts::CLIENT_IDLE_MS),
    }
}
