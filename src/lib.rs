//! Patchgate library
//!
//! Pre-authentication client patch delivery: a registry of patch payloads,
//! per-session transfer jobs driven by a server tick, and the XFER wire codec.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logger;
pub mod protocol;
pub mod protocol_core;
pub mod registry;
pub mod sender;
pub mod server;
pub mod service;
pub mod session;

pub use error::PatchError;
pub use registry::{PatchInfo, PatchRegistry};
pub use service::PatchService;
