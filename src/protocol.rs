//! Shared protocol constants for the XFER patch transport
//!
//! All multi-byte fields are little-endian.

/// Literal name carried by INITIATE; the client shows it as the download kind
pub const INITIATE_TAG: &[u8; 5] = b"Patch";

/// DATA frames carry a u16 length, so no chunk may exceed this
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

// Configured chunk size is clamped into this range
pub const MIN_CONFIGURED_CHUNK: u32 = 100;
pub const MAX_CONFIGURED_CHUNK: u32 = 65535;

/// Frames a connection may have queued before the sender holds back its job
pub const OUTBOUND_QUEUE_FRAMES: usize = 4;

/// Block size used when hashing patch files
pub const HASH_BLOCK_SIZE: usize = 8192;

// Command opcodes (keep numeric stable for compat with shipped clients)
pub mod cmd {
    // Login stand-in used by the demo daemon
    pub const HELLO: u8 = 0x00;
    pub const UP_TO_DATE: u8 = 0x01;

    pub const INITIATE: u8 = 0x30;
    pub const DATA: u8 = 0x31;
    pub const ACCEPT: u8 = 0x32;
    pub const RESUME: u8 = 0x33;
    pub const CANCEL: u8 = 0x34;
}

// Fixed frame sizes (cmd byte included)
pub mod sizes {
    /// cmd | name_len | "Patch" | file_size u64 | md5[16]
    pub const INITIATE: usize = 1 + 1 + 5 + 8 + 16;
    /// cmd | chunk_len u16
    pub const DATA_HEADER: usize = 1 + 2;
    pub const ACCEPT: usize = 1;
    /// cmd | offset u64
    pub const RESUME: usize = 1 + 8;
    pub const CANCEL: usize = 1;
    /// cmd | build u32 | locale[4]
    pub const HELLO: usize = 1 + 4 + 4;
}

// Centralized timeout constants for the demo daemon and client
pub mod timeouts {
    // Time allowed for the HELLO frame after accept (ms)
    pub const HELLO_MS: u64 = 5_000;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 2_000;

    // Client-side idle limit between server frames (ms)
    pub const CLIENT_IDLE_MS: u64 = 30_000;

    // How long a closing connection may take to flush queued frames (ms)
    pub const WRITER_DRAIN_MS: u64 = 5_000;

    // Default server tick period (ms)
    pub const TICK_MS: u64 = 10;
}
