use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::registry::PatchInfo;
use crate::session::SessionId;

/// Sink for transfer lifecycle events.
///
/// `progress` is only called when a transfer crosses into a new decile.
pub trait TransferLogger: Send + Sync {
    fn patch_loaded(&self, _patch: &PatchInfo) {}
    fn initiated(&self, _session: SessionId, _patch: &PatchInfo) {}
    fn progress(&self, _session: SessionId, _patch: &PatchInfo, _percent: u32, _offset: u64) {}
    fn completed(&self, _session: SessionId, _patch: &PatchInfo) {}
    fn canceled(&self, _session: SessionId) {}
    fn failed(&self, _session: SessionId, _msg: &str) {}
}

pub struct NoopLogger;
impl TransferLogger for NoopLogger {}

/// Append-only text log, one event per line
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl TransferLogger for TextLogger {
    fn patch_loaded(&self, patch: &PatchInfo) {
        self.line(&format!(
            "LOAD path={} build={} locale={} bytes={}",
            patch.path.display(),
            patch.build,
            patch.locale,
            patch.file_size
        ));
    }
    fn initiated(&self, session: SessionId, patch: &PatchInfo) {
        self.line(&format!(
            "INITIATE session={} path={} bytes={}",
            session,
            patch.path.display(),
            patch.file_size
        ));
    }
    fn progress(&self, session: SessionId, patch: &PatchInfo, percent: u32, offset: u64) {
        self.line(&format!(
            "PROGRESS session={} path={} pct={} offset={}/{}",
            session,
            patch.path.display(),
            percent,
            offset,
            patch.file_size
        ));
    }
    fn completed(&self, session: SessionId, patch: &PatchInfo) {
        self.line(&format!("DONE session={} path={}", session, patch.path.display()));
    }
    fn canceled(&self, session: SessionId) {
        self.line(&format!("CANCEL session={session}"));
    }
    fn failed(&self, session: SessionId, msg: &str) {
        self.line(&format!("ERROR session={session} msg={msg}"));
    }
}

/// Forwards events to `tracing`
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn patch_loaded(&self, patch: &PatchInfo) {
        tracing::info!(
            path = %patch.path.display(),
            build = patch.build,
            locale = %patch.locale,
            bytes = patch.file_size,
            "loaded patch"
        );
    }
    fn initiated(&self, session: SessionId, patch: &PatchInfo) {
        tracing::info!(%session, bytes = patch.file_size, "initiating patch transfer");
    }
    fn progress(&self, _session: SessionId, patch: &PatchInfo, percent: u32, offset: u64) {
        tracing::info!(
            "[Patch] {} - {}% ({}/{} bytes)",
            patch.path.display(),
            percent,
            offset,
            patch.file_size
        );
    }
    fn completed(&self, session: SessionId, patch: &PatchInfo) {
        tracing::info!(%session, path = %patch.path.display(), "patch transfer completed");
    }
    fn canceled(&self, session: SessionId) {
        tracing::debug!(%session, "patch transfer canceled");
    }
    fn failed(&self, session: SessionId, msg: &str) {
        tracing::error!(%session, "patch transfer failed: {msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_text_logger_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/xfer.log");
        let logger = TextLogger::new(&path).unwrap();
        let patch = PatchInfo {
            locale: "engb".into(),
            build: 12340,
            path: PathBuf::from("enGB12340.mpq"),
            file_size: 1000,
            hash: [0; 16],
        };
        let session = SessionId::new();
        logger.initiated(session, &patch);
        logger.progress(session, &patch, 30, 300);
        logger.canceled(session);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("INITIATE"));
        assert!(lines[1].contains("pct=30 offset=300/1000"));
        assert!(lines[2].contains(&format!("CANCEL session={session}")));
    }
}
