//! Patch service: owns the registry, session table and job manager for the
//! lifetime of one server instance.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PatchConfig;
use crate::jobs::{TickReport, TransferJobManager};
use crate::logger::TransferLogger;
use crate::registry::PatchRegistry;
use crate::session::SessionTable;

pub struct PatchService {
    config: PatchConfig,
    min_build: AtomicU32,
    registry: PatchRegistry,
    sessions: Arc<SessionTable>,
    jobs: TransferJobManager,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl PatchService {
    pub fn new(config: PatchConfig, logger: Arc<dyn TransferLogger>) -> Self {
        let sessions = Arc::new(SessionTable::new());
        let registry = PatchRegistry::new(
            config.enabled,
            config.directory.clone(),
            config.extension.clone(),
            Arc::clone(&logger),
        );
        let jobs = TransferJobManager::new(config.effective_chunk_size(), Arc::clone(&sessions), logger);
        Self {
            min_build: AtomicU32::new(config.min_build),
            config,
            registry,
            sessions,
            jobs,
            ticker: Mutex::new(None),
        }
    }

    /// Log the banner and load patches when enabled
    pub fn start(&self) -> usize {
        if !self.is_enabled() {
            info!("Client Patching System is disabled");
            return 0;
        }
        info!("========================================");
        info!("  Client Patching System Enabled");
        info!("  Min Build: {}", self.min_build());
        info!("  Patch Directory: {}", self.config.directory.display());
        info!("  Chunk Size: {} bytes", self.config.effective_chunk_size());
        info!("========================================");
        self.registry.load()
    }

    /// Rescan the patch directory; running transfers keep their payload
    pub fn reload(&self) -> usize {
        self.registry.load()
    }

    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn jobs(&self) -> &TransferJobManager {
        &self.jobs
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.registry.set_enabled(enabled);
    }

    pub fn min_build(&self) -> u32 {
        self.min_build.load(Ordering::Relaxed)
    }

    pub fn set_min_build(&self, build: u32) {
        self.min_build.store(build, Ordering::Relaxed);
    }

    pub fn needs_patch(&self, build: u32) -> bool {
        self.is_enabled() && build < self.min_build()
    }

    /// One maintenance cycle. Sessions whose job failed are disconnected.
    pub fn tick(&self) -> TickReport {
        if !self.is_enabled() {
            return TickReport::default();
        }
        let report = self.jobs.tick();
        for (session, _) in &report.failed {
            if let Some(transport) = self.sessions.get(*session) {
                transport.disconnect();
            }
        }
        report
    }

    /// Drive `tick` every `interval` on the blocking pool
    pub fn spawn_ticker(self: &Arc<Self>, interval: Duration) {
        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let svc = Arc::clone(&svc);
                if let Err(e) = tokio::task::spawn_blocking(move || svc.tick()).await {
                    warn!("patch tick panicked: {}", e);
                }
            }
        });
        if let Some(old) = self.ticker.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the tick driver and drop every in-flight job
    pub fn shutdown(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
        let dropped = self.jobs.cancel_all();
        if dropped > 0 {
            info!("Dropped {} in-flight patch transfer(s)", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NoopLogger;
    use crate::session::tests::RecordingTransport;
    use crate::session::{PatchTransport, SessionId};
    use tempfile::TempDir;

    fn config(dir: &std::path::Path, enabled: bool) -> PatchConfig {
        PatchConfig {
            enabled,
            min_build: 12340,
            directory: dir.to_path_buf(),
            chunk_size: 50, // clamped to 100
            ..PatchConfig::default()
        }
    }

    #[test]
    fn test_disabled_service_loads_nothing() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("enGB8606.mpq"), b"x").unwrap();
        let svc = PatchService::new(config(tmp.path(), false), Arc::new(NoopLogger));
        assert_eq!(svc.start(), 0);
        assert!(!svc.needs_patch(1));
        assert!(svc.registry().find_patch_for_client(8606, "enGB").is_none());
    }

    #[test]
    fn test_needs_patch_threshold() {
        let tmp = TempDir::new().unwrap();
        let svc = PatchService::new(config(tmp.path(), true), Arc::new(NoopLogger));
        assert!(svc.needs_patch(12339));
        assert!(!svc.needs_patch(12340));
        svc.set_min_build(20000);
        assert!(svc.needs_patch(12340));
    }

    #[test]
    fn test_tick_uses_clamped_chunk_and_disconnects_failures() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("enGB8606.mpq"), vec![9u8; 250]).unwrap();
        let svc = PatchService::new(config(tmp.path(), true), Arc::new(NoopLogger));
        assert_eq!(svc.start(), 1);

        let id = SessionId::new();
        let transport = Arc::new(RecordingTransport::default());
        svc.sessions().register(id, transport.clone() as Arc<dyn PatchTransport>);
        let patch = svc.registry().find_patch_for_client(8606, "enGB").unwrap();
        svc.jobs().initiate(id, patch).unwrap();
        svc.jobs().accept(id).unwrap();

        assert_eq!(svc.tick().bytes_sent, 100);

        // truncate behind the job's back
        std::fs::write(tmp.path().join("enGB8606.mpq"), vec![9u8; 120]).unwrap();
        let report = svc.tick();
        assert_eq!(report.failed.len(), 1);
        assert!(*transport.disconnected.lock());
        assert!(svc.jobs().is_empty());
    }

    #[test]
    fn test_shutdown_cancels_jobs() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("enGB0.mpq"), vec![1u8; 10]).unwrap();
        let svc = PatchService::new(config(tmp.path(), true), Arc::new(NoopLogger));
        svc.start();
        let id = SessionId::new();
        svc.sessions().register(id, Arc::new(RecordingTransport::default()));
        let patch = svc.registry().find_patch_for_client(1, "engb").unwrap();
        svc.jobs().initiate(id, patch).unwrap();

        svc.shutdown();
        assert!(svc.jobs().is_empty());
    }
}
