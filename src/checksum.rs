//! Checksum and hashing utilities

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::protocol::HASH_BLOCK_SIZE;

/// 128-bit content hash sent in INITIATE
pub type PatchHash = [u8; 16];

/// Stream a file through MD5 in fixed-size blocks
pub fn file_digest(path: &Path) -> io::Result<PatchHash> {
    let mut file = File::open(path)?;
    digest_reader(&mut file)
}

pub fn digest_reader<R: Read>(reader: &mut R) -> io::Result<PatchHash> {
    let mut ctx = md5::Context::new();
    let mut buf = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        ctx.consume(&buf[..n]);
    }
    Ok(ctx.compute().0)
}

/// Lower-case hex rendering for logs and listings
pub fn to_hex(hash: &PatchHash) -> String {
    format!("{:x}", md5::Digest(*hash))
}
