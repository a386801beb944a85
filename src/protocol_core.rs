//! Frame encoding and decoding shared by the daemon and the client
//!
//! Every routine works over plain byte buffers with explicit little-endian
//! fields, so nothing here depends on host layout.

use crate::error::{PatchError, Result};
use crate::protocol::{cmd, sizes, INITIATE_TAG, MAX_CHUNK_SIZE};

/// Commands a client may send once a transfer has been offered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Accept,
    Resume { offset: u64 },
    Cancel,
}

impl ClientCommand {
    /// Frame length implied by a command byte, including the byte itself
    pub fn frame_len(command: u8) -> Result<usize> {
        match command {
            cmd::ACCEPT => Ok(sizes::ACCEPT),
            cmd::RESUME => Ok(sizes::RESUME),
            cmd::CANCEL => Ok(sizes::CANCEL),
            other => Err(PatchError::UnknownCommand(other)),
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let Some(&command) = frame.first() else {
            return Err(PatchError::FrameTooShort { need: 1, got: 0 });
        };
        let need = Self::frame_len(command)?;
        if frame.len() < need {
            return Err(PatchError::FrameTooShort { need, got: frame.len() });
        }
        Ok(match command {
            cmd::ACCEPT => ClientCommand::Accept,
            cmd::RESUME => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&frame[1..9]);
                ClientCommand::Resume { offset: u64::from_le_bytes(raw) }
            }
            _ => ClientCommand::Cancel,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            ClientCommand::Accept => vec![cmd::ACCEPT],
            ClientCommand::Cancel => vec![cmd::CANCEL],
            ClientCommand::Resume { offset } => {
                let mut out = Vec::with_capacity(sizes::RESUME);
                out.push(cmd::RESUME);
                out.extend_from_slice(&offset.to_le_bytes());
                out
            }
        }
    }
}

/// Decoded INITIATE body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiateFrame {
    pub file_size: u64,
    pub hash: [u8; 16],
}

/// Build the INITIATE frame (33 bytes)
/// Format: CMD (1) | NAME_LEN (1) | "Patch" (5) | FILE_SIZE (8) | MD5 (16)
pub fn encode_initiate(file_size: u64, hash: &[u8; 16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sizes::INITIATE);
    out.push(cmd::INITIATE);
    out.push(INITIATE_TAG.len() as u8);
    out.extend_from_slice(INITIATE_TAG);
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(hash);
    out
}

pub fn decode_initiate(frame: &[u8]) -> Result<InitiateFrame> {
    if frame.len() < sizes::INITIATE {
        return Err(PatchError::FrameTooShort { need: sizes::INITIATE, got: frame.len() });
    }
    if frame[0] != cmd::INITIATE {
        return Err(PatchError::UnexpectedCommand(frame[0]));
    }
    if frame[1] as usize != INITIATE_TAG.len() || &frame[2..7] != INITIATE_TAG {
        return Err(PatchError::BadTag);
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&frame[7..15]);
    let mut hash = [0u8; 16];
    hash.copy_from_slice(&frame[15..31]);
    Ok(InitiateFrame { file_size: u64::from_le_bytes(size), hash })
}

/// Build a DATA frame: CMD (1) | CHUNK_LEN u16 (2) | payload
///
/// Callers cap the payload to `MAX_CHUNK_SIZE` before framing.
pub fn encode_data(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_CHUNK_SIZE);
    let mut out = Vec::with_capacity(sizes::DATA_HEADER + payload.len());
    out.push(cmd::DATA);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parse the 3-byte DATA header, returning the payload length
pub fn parse_data_header(header: &[u8; sizes::DATA_HEADER]) -> Result<usize> {
    if header[0] != cmd::DATA {
        return Err(PatchError::UnexpectedCommand(header[0]));
    }
    Ok(u16::from_le_bytes([header[1], header[2]]) as usize)
}

/// Client greeting used by the demo daemon in place of a real login handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub build: u32,
    pub locale: String,
}

impl Hello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(sizes::HELLO);
        out.push(cmd::HELLO);
        out.extend_from_slice(&self.build.to_le_bytes());
        let mut locale = [b' '; 4];
        for (dst, src) in locale.iter_mut().zip(self.locale.bytes()) {
            *dst = src;
        }
        out.extend_from_slice(&locale);
        out
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < sizes::HELLO {
            return Err(PatchError::FrameTooShort { need: sizes::HELLO, got: frame.len() });
        }
        if frame[0] != cmd::HELLO {
            return Err(PatchError::UnexpectedCommand(frame[0]));
        }
        let build = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let locale = String::from_utf8_lossy(&frame[5..9]).trim().to_string();
        Ok(Hello { build, locale })
    }
}
