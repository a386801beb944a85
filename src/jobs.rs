//! In-flight transfer jobs and their lifecycle.
//!
//! ```text
//! NONE -> PENDING -> ACTIVE -> { COMPLETED | CANCELED }
//!            \________/  ^
//!              RESUME ---'
//! ```
//!
//! Every operation serializes on one lock over the job set. The chunk
//! read and send inside `tick` runs under that lock too; file opens in
//! `accept`/`resume` do not.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{PatchError, Result};
use crate::logger::TransferLogger;
use crate::protocol_core::encode_initiate;
use crate::registry::PatchInfo;
use crate::sender::{percent, ChunkOutcome, ChunkSender};
use crate::session::{SessionId, SessionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Offered; waiting for ACCEPT or RESUME
    Pending,
    Active,
    /// Read or send failed; reaped by the next sweep
    Failed,
}

pub struct TransferJob {
    pub(crate) session: SessionId,
    pub(crate) patch: Arc<PatchInfo>,
    pub(crate) file: Option<File>,
    pub(crate) offset: u64,
    pub(crate) state: JobState,
    pub(crate) last_logged_progress: u32,
    /// Distinguishes this job from a later one for the same session
    pub(crate) generation: u64,
}

impl TransferJob {
    pub(crate) fn pending(session: SessionId, patch: Arc<PatchInfo>, generation: u64) -> Self {
        Self {
            session,
            patch,
            file: None,
            offset: 0,
            state: JobState::Pending,
            last_logged_progress: 0,
            generation,
        }
    }

    fn is_complete(&self) -> bool {
        self.state == JobState::Active && self.offset >= self.patch.file_size
    }
}

/// Read-only view of a job for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub offset: u64,
    pub file_size: u64,
    pub file_open: bool,
}

/// Outcome of one `tick`
#[derive(Debug, Default)]
pub struct TickReport {
    pub bytes_sent: u64,
    pub chunks_sent: usize,
    /// Jobs held back because their connection had not drained
    pub backpressured: usize,
    pub completed: Vec<SessionId>,
    pub failed: Vec<(SessionId, PatchError)>,
}

pub struct TransferJobManager {
    jobs: Mutex<HashMap<SessionId, TransferJob>>,
    sessions: Arc<SessionTable>,
    sender: ChunkSender,
    logger: Arc<dyn TransferLogger>,
    next_generation: AtomicU64,
}

impl TransferJobManager {
    pub fn new(chunk_size: usize, sessions: Arc<SessionTable>, logger: Arc<dyn TransferLogger>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            sessions,
            sender: ChunkSender::new(chunk_size),
            logger,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Offer `patch` to `session`, superseding any job it already has.
    ///
    /// Succeeds once the session is known. A failed INITIATE send is only
    /// logged; the job stays pending until the session closes or cancels.
    pub fn initiate(&self, session: SessionId, patch: Arc<PatchInfo>) -> Result<()> {
        let transport = self.sessions.get(session).ok_or(PatchError::UnknownSession)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut jobs = self.jobs.lock();
        if jobs.remove(&session).is_some() {
            debug!(%session, "superseding existing patch job");
        }
        jobs.insert(session, TransferJob::pending(session, Arc::clone(&patch), generation));

        if let Err(e) = transport.send_frame(encode_initiate(patch.file_size, &patch.hash)) {
            warn!(%session, "failed to send XFER_INITIATE: {}", e);
        }
        drop(jobs);

        self.logger.initiated(session, &patch);
        Ok(())
    }

    /// Client accepted: open the file from the start and go active.
    ///
    /// On open failure the job stays pending and the caller should cancel.
    pub fn accept(&self, session: SessionId) -> Result<()> {
        loop {
            let (path, generation) = self.pending_target(session)?;
            let file = open_patch(&path)?;

            let mut jobs = self.jobs.lock();
            let job = jobs.get_mut(&session).ok_or(PatchError::NoPendingTransfer)?;
            if job.generation != generation {
                // re-offered while we were opening; start over with the new patch
                continue;
            }
            debug!(%session, "Client accepted patch transfer");
            job.file = Some(file);
            job.offset = 0;
            job.last_logged_progress = 0;
            job.state = JobState::Active;
            return Ok(());
        }
    }

    /// Client resumes at an absolute offset within `[0, file_size]`
    pub fn resume(&self, session: SessionId, offset: u64) -> Result<()> {
        loop {
            let (path, generation) = {
                let mut jobs = self.jobs.lock();
                let job = jobs.get_mut(&session).ok_or(PatchError::NoPendingTransfer)?;
                if offset > job.patch.file_size {
                    warn!(%session, offset, size = job.patch.file_size, "resume offset out of range");
                    return Err(PatchError::OffsetOutOfRange {
                        offset,
                        size: job.patch.file_size,
                    });
                }
                if let Some(file) = job.file.as_mut() {
                    file.seek(SeekFrom::Start(offset))
                        .map_err(|source| PatchError::Seek { offset, source })?;
                    activate_at(job, offset);
                    return Ok(());
                }
                (job.patch.path.clone(), job.generation)
            };

            let mut file = open_patch(&path)?;
            file.seek(SeekFrom::Start(offset))
                .map_err(|source| PatchError::Seek { offset, source })?;

            let mut jobs = self.jobs.lock();
            let job = jobs.get_mut(&session).ok_or(PatchError::NoPendingTransfer)?;
            if job.generation != generation {
                continue;
            }
            job.file = Some(file);
            activate_at(job, offset);
            return Ok(());
        }
    }

    /// Drop the session's job if any. Always succeeds; returns whether a job existed.
    pub fn cancel(&self, session: SessionId) -> bool {
        let removed = self.jobs.lock().remove(&session).is_some();
        if removed {
            self.logger.canceled(session);
        }
        removed
    }

    /// Drop every job (server shutdown)
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<SessionId> = self.jobs.lock().drain().map(|(id, _)| id).collect();
        for session in &drained {
            self.logger.canceled(*session);
        }
        drained.len()
    }

    /// Send one chunk for every active job, then reap finished and failed jobs
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut finished = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for job in jobs.values_mut() {
                if job.state != JobState::Active || job.file.is_none() {
                    continue;
                }
                let Some(transport) = self.sessions.get(job.session) else {
                    job.state = JobState::Failed;
                    report.failed.push((job.session, PatchError::SessionGone));
                    continue;
                };
                match self.sender.send_chunk(job, transport.as_ref(), self.logger.as_ref()) {
                    Ok(ChunkOutcome::Sent(n)) => {
                        report.bytes_sent += n as u64;
                        report.chunks_sent += 1;
                    }
                    Ok(ChunkOutcome::Backpressured) => report.backpressured += 1,
                    Ok(ChunkOutcome::Exhausted) => {}
                    Err(e) => {
                        error!(session = %job.session, "{}", e);
                        report.failed.push((job.session, e));
                    }
                }
            }

            jobs.retain(|_, job| {
                if job.state == JobState::Failed {
                    return false;
                }
                if job.is_complete() {
                    finished.push((job.session, Arc::clone(&job.patch)));
                    return false;
                }
                true
            });
        }

        for (session, patch) in finished {
            self.logger.completed(session, &patch);
            report.completed.push(session);
        }
        for (session, e) in &report.failed {
            self.logger.failed(*session, &e.to_string());
        }
        report
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self, session: SessionId) -> Option<JobStatus> {
        self.jobs.lock().get(&session).map(|job| JobStatus {
            state: job.state,
            offset: job.offset,
            file_size: job.patch.file_size,
            file_open: job.file.is_some(),
        })
    }

    fn pending_target(&self, session: SessionId) -> Result<(PathBuf, u64)> {
        let jobs = self.jobs.lock();
        match jobs.get(&session) {
            Some(job) => Ok((job.patch.path.clone(), job.generation)),
            None => {
                warn!(%session, "XFER_ACCEPT received but no pending job found");
                Err(PatchError::NoPendingTransfer)
            }
        }
    }
}

fn open_patch(path: &std::path::Path) -> Result<File> {
    File::open(path).map_err(|source| {
        error!("Failed to open patch file: {}", path.display());
        PatchError::Open {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn activate_at(job: &mut TransferJob, offset: u64) {
    debug!(session = %job.session, offset, "Client resuming patch transfer");
    job.offset = offset;
    job.last_logged_progress = percent(offset, job.patch.file_size);
    job.state = JobState::Active;
}
