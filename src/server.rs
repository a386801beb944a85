//! Async (Tokio) demo login daemon.
//!
//! Stands in for the real authentication server: each connection sends a
//! HELLO with its build and locale, and either gets UP_TO_DATE or is handed
//! to the patch subsystem until it cancels, finishes, or disconnects.

use anyhow::{Context, Result};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::protocol::{cmd, sizes, timeouts, OUTBOUND_QUEUE_FRAMES};
use crate::protocol_core::{ClientCommand, Hello};
use crate::service::PatchService;
use crate::session::{Disposition, PatchSession, PatchTransport};

/// Queues frames for the connection's writer task.
///
/// The queue holds a few frames; a full queue is reported as `WouldBlock`
/// so a client that stops reading stalls its own transfer.
struct ConnectionTransport {
    tx: mpsc::Sender<Vec<u8>>,
    closing: Arc<Notify>,
}

impl PatchTransport for ConnectionTransport {
    fn send_frame(&self, frame: Vec<u8>) -> io::Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => io::Error::new(io::ErrorKind::WouldBlock, "outbound queue full"),
            TrySendError::Closed(_) => io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"),
        })
    }

    fn ready(&self) -> bool {
        self.tx.capacity() > 0
    }

    fn disconnect(&self) {
        self.closing.notify_one();
    }
}

pub async fn serve(bind: &str, service: Arc<PatchService>) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {}", bind))?;
    serve_listener(listener, service).await
}

pub async fn serve_listener(listener: TcpListener, service: Arc<PatchService>) -> Result<()> {
    info!(
        "patchd listening on {} patches={} min_build={}",
        listener.local_addr()?,
        service.registry().len(),
        service.min_build()
    );
    loop {
        let (stream, peer) = listener.accept().await?;
        let _ = stream.set_nodelay(true);
        debug!("conn from {}", peer);
        // Spawn per-connection task.
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, service).await {
                warn!("connection {} ended: {:#}", peer, e);
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, service: Arc<PatchService>) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
    let closing = Arc::new(Notify::new());

    let mut writer_task = tokio::spawn(write_frames(writer, rx, Arc::clone(&closing)));

    let transport = Arc::new(ConnectionTransport { tx, closing });
    let mut session = PatchSession::new(service, transport);

    let (result, writer_done) = tokio::select! {
        r = run_session(&mut reader, &mut session) => (r, false),
        _ = &mut writer_task => (Ok(()), true),
    };

    // teardown: the job goes before the socket. Unregistering drops the
    // last sender, so the writer flushes what is queued and shuts down.
    off_runtime(|| session.close());
    drop(session);
    if !writer_done
        && timeout(Duration::from_millis(timeouts::WRITER_DRAIN_MS), &mut writer_task)
            .await
            .is_err()
    {
        debug!("peer not draining; dropping connection");
        writer_task.abort();
    }
    result
}

/// Drain the outbound queue onto the socket until every sender is gone,
/// or stop at once when `closing` fires.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    closing: Arc<Notify>,
) -> io::Result<()> {
    loop {
        let frame = tokio::select! {
            _ = closing.notified() => return Ok(()),
            frame = rx.recv() => frame,
        };
        let Some(frame) = frame else { break };
        tokio::select! {
            _ = closing.notified() => return Ok(()),
            res = writer.write_all(&frame) => res?,
        }
    }
    writer.shutdown().await
}

/// Run a session call that may open files or wait on the job lock.
///
/// On a multi-thread runtime the worker hands its other tasks off first.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

async fn run_session(reader: &mut OwnedReadHalf, session: &mut PatchSession) -> Result<()> {
    let mut hello = [0u8; sizes::HELLO];
    timeout(Duration::from_millis(timeouts::HELLO_MS), reader.read_exact(&mut hello))
        .await
        .context("hello timeout")??;
    let hello = Hello::decode(&hello)?;
    debug!(session = %session.id(), build = hello.build, locale = %hello.locale, "hello");

    if !off_runtime(|| session.check_and_initiate(hello.build, &hello.locale))? {
        // nothing to deliver; a real login server would continue its handshake here
        session.send_frame(vec![cmd::UP_TO_DATE])?;
        return Ok(());
    }

    loop {
        let mut command = [0u8; 1];
        match reader.read_exact(&mut command).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let len = ClientCommand::frame_len(command[0])?;
        let mut frame = vec![0u8; len];
        frame[0] = command[0];
        reader.read_exact(&mut frame[1..]).await?;

        let command = ClientCommand::decode(&frame)?;
        match off_runtime(|| session.handle(command))? {
            Disposition::KeepOpen => {}
            Disposition::Close => return Ok(()),
        }
    }
}
