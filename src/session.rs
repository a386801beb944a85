//! Session boundary: stable identities, the transport seam, and the per-connection
//! dispatcher that decides when to hand a client over to the patch subsystem.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PatchError, Result};
use crate::protocol::cmd;
use crate::protocol_core::ClientCommand;
use crate::service::PatchService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound side of a client connection.
///
/// `send_frame` is called with the job lock held and must not block on the
/// network. Implementations queue the bytes into a bounded buffer and return
/// `io::ErrorKind::WouldBlock` when it is full; the chunk sender then holds
/// the job at its offset until a later tick.
pub trait PatchTransport: Send + Sync {
    fn send_frame(&self, frame: Vec<u8>) -> io::Result<()>;

    /// Whether a frame sent now would be queued
    fn ready(&self) -> bool {
        true
    }

    fn disconnect(&self) {}
}

/// Lookup table from session identity to its live transport
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, Arc<dyn PatchTransport>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SessionId, transport: Arc<dyn PatchTransport>) {
        self.sessions.write().insert(id, transport);
    }

    pub fn unregister(&self, id: SessionId) -> bool {
        self.sessions.write().remove(&id).is_some()
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<dyn PatchTransport>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Still in the login handshake; XFER commands are rejected
    Authenticating,
    /// A transfer has been offered
    Transfer,
    Closed,
}

/// What the connection owner should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    KeepOpen,
    Close,
}

/// Per-connection glue between a login session and the patch service.
///
/// Registers itself in the session table on creation and cancels any
/// transfer and unregisters on `close` or drop.
pub struct PatchSession {
    id: SessionId,
    service: Arc<PatchService>,
    status: SessionStatus,
}

impl PatchSession {
    pub fn new(service: Arc<PatchService>, transport: Arc<dyn PatchTransport>) -> Self {
        let id = SessionId::new();
        service.sessions().register(id, transport);
        Self {
            id,
            service,
            status: SessionStatus::Authenticating,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Offer a patch if the client is below the minimum build and one matches.
    ///
    /// Returns `Ok(false)` when the login should proceed (or be rejected) normally.
    pub fn check_and_initiate(&mut self, build: u32, locale: &str) -> Result<bool> {
        if !self.service.needs_patch(build) {
            return Ok(false);
        }
        let Some(patch) = self.service.registry().find_patch_for_client(build, locale) else {
            debug!("No patch available for build {} locale {}", build, locale);
            return Ok(false);
        };
        info!(
            "Client build {} is below minimum {}, initiating patch transfer",
            build,
            self.service.min_build()
        );
        self.service.jobs().initiate(self.id, patch)?;
        self.status = SessionStatus::Transfer;
        Ok(true)
    }

    /// Dispatch one client XFER command
    pub fn handle(&mut self, command: ClientCommand) -> Result<Disposition> {
        match command {
            ClientCommand::Cancel => {
                debug!(session = %self.id, "XFER_CANCEL received");
                self.close();
                Ok(Disposition::Close)
            }
            ClientCommand::Accept => {
                self.require_transfer(cmd::ACCEPT)?;
                self.service.jobs().accept(self.id)?;
                Ok(Disposition::KeepOpen)
            }
            ClientCommand::Resume { offset } => {
                self.require_transfer(cmd::RESUME)?;
                self.service.jobs().resume(self.id, offset)?;
                Ok(Disposition::KeepOpen)
            }
        }
    }

    /// Send a frame outside the transfer flow (login replies)
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        let transport = self
            .service
            .sessions()
            .get(self.id)
            .ok_or(PatchError::UnknownSession)?;
        transport.send_frame(frame).map_err(PatchError::Transport)
    }

    fn require_transfer(&self, command: u8) -> Result<()> {
        if self.status != SessionStatus::Transfer {
            warn!(session = %self.id, "XFER command 0x{:02x} received but no pending patch", command);
            return Err(PatchError::UnexpectedCommand(command));
        }
        Ok(())
    }

    /// Tear down: drop any transfer and leave the session table
    pub fn close(&mut self) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.service.jobs().cancel(self.id);
        self.service.sessions().unregister(self.id);
        self.status = SessionStatus::Closed;
    }
}

impl Drop for PatchSession {
    fn drop(&mut self) {
        self.close();
    }
}
