use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures scoped to a single session's transfer.
///
/// None of these are process-fatal; the session layer decides whether to
/// drop the connection.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("session is not registered")]
    UnknownSession,

    #[error("no pending transfer")]
    NoPendingTransfer,

    #[error("failed to open patch file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek patch file to offset {offset}: {source}")]
    Seek {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("resume offset {offset} outside patch of {size} bytes")]
    OffsetOutOfRange { offset: u64, size: u64 },

    #[error("failed to read patch chunk at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("patch file truncated at offset {offset}: wanted {expected} bytes, got {got}")]
    Truncated { offset: u64, expected: usize, got: usize },

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    #[error("session went away with a transfer in flight")]
    SessionGone,

    #[error("command 0x{0:02x} not valid in the current session state")]
    UnexpectedCommand(u8),

    #[error("unknown command 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("frame too short: need {need} bytes, got {got}")]
    FrameTooShort { need: usize, got: usize },

    #[error("INITIATE frame carries an unexpected name tag")]
    BadTag,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PatchError>;
