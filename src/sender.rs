//! Chunk sender: moves one bounded slice of a patch file onto the wire per call

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{PatchError, Result};
use crate::jobs::{JobState, TransferJob};
use crate::logger::TransferLogger;
use crate::protocol::MAX_CHUNK_SIZE;
use crate::protocol_core::encode_data;
use crate::session::PatchTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Sent(usize),
    /// The transport's queue is full; offset and file cursor are unchanged
    Backpressured,
    /// Nothing left to send; the job is reaped by the tick sweep
    Exhausted,
}

pub struct ChunkSender {
    chunk_size: usize,
}

impl ChunkSender {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read, frame and hand off the next chunk of `job`.
    ///
    /// Any failure marks the job `Failed` before returning the error, so a
    /// broken job is never left idle in the active set. A transport that
    /// reports `WouldBlock` holds the job where it is until a later call.
    pub fn send_chunk(
        &self,
        job: &mut TransferJob,
        transport: &dyn PatchTransport,
        logger: &dyn TransferLogger,
    ) -> Result<ChunkOutcome> {
        let file_size = job.patch.file_size;
        let remaining = file_size.saturating_sub(job.offset);
        let chunk_len = remaining.min(self.chunk_size as u64) as usize;
        if chunk_len == 0 {
            return Ok(ChunkOutcome::Exhausted);
        }
        let Some(file) = job.file.as_mut() else {
            return Ok(ChunkOutcome::Exhausted);
        };
        if !transport.ready() {
            return Ok(ChunkOutcome::Backpressured);
        }

        let mut chunk = vec![0u8; chunk_len];
        let filled = match read_full(file, &mut chunk) {
            Ok(n) => n,
            Err(source) => {
                job.state = JobState::Failed;
                return Err(PatchError::Read { offset: job.offset, source });
            }
        };
        if filled < chunk_len {
            job.state = JobState::Failed;
            return Err(PatchError::Truncated {
                offset: job.offset,
                expected: chunk_len,
                got: filled,
            });
        }

        match transport.send_frame(encode_data(&chunk)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // put the cursor back so the same slice is read next time
                if let Err(source) = file.seek(SeekFrom::Start(job.offset)) {
                    job.state = JobState::Failed;
                    return Err(PatchError::Seek { offset: job.offset, source });
                }
                return Ok(ChunkOutcome::Backpressured);
            }
            Err(e) => {
                job.state = JobState::Failed;
                return Err(PatchError::Transport(e));
            }
        }
        job.offset += chunk_len as u64;

        let progress = percent(job.offset, file_size);
        if progress / 10 > job.last_logged_progress / 10 {
            logger.progress(job.session, &job.patch, progress, job.offset);
            job.last_logged_progress = progress;
        }

        Ok(ChunkOutcome::Sent(chunk_len))
    }
}

/// floor(offset * 100 / size), 100 for an empty file
pub(crate) fn percent(offset: u64, size: u64) -> u32 {
    if size == 0 {
        return 100;
    }
    ((offset as u128 * 100) / size as u128) as u32
}

/// Fill `buf` unless EOF comes first; returns the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PatchInfo;
    use crate::session::tests::RecordingTransport;
    use crate::session::SessionId;
    use parking_lot::Mutex;
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingLogger {
        percents: Mutex<Vec<u32>>,
    }

    impl TransferLogger for RecordingLogger {
        fn progress(&self, _s: SessionId, _p: &PatchInfo, percent: u32, _o: u64) {
            self.percents.lock().push(percent);
        }
    }

    struct FailingTransport;
    impl PatchTransport for FailingTransport {
        fn send_frame(&self, _frame: Vec<u8>) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    /// Accepts frames only while `open` is set
    struct CongestedTransport {
        open: AtomicBool,
        advertise_ready: bool,
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl CongestedTransport {
        fn new(advertise_ready: bool) -> Self {
            Self {
                open: AtomicBool::new(false),
                advertise_ready,
                frames: Mutex::new(Vec::new()),
            }
        }
    }

    impl PatchTransport for CongestedTransport {
        fn send_frame(&self, frame: Vec<u8>) -> io::Result<()> {
            if !self.open.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "queue full"));
            }
            self.frames.lock().push(frame);
            Ok(())
        }

        fn ready(&self) -> bool {
            !self.advertise_ready || self.open.load(Ordering::SeqCst)
        }
    }

    fn active_job(dir: &Path, len: usize, recorded_size: u64) -> TransferJob {
        let path = dir.join("enGB12340.mpq");
        let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, data).unwrap();
        let patch = Arc::new(PatchInfo {
            locale: "engb".into(),
            build: 12340,
            path: path.clone(),
            file_size: recorded_size,
            hash: [0; 16],
        });
        let mut job = TransferJob::pending(SessionId::new(), patch, 1);
        job.file = Some(File::open(&path).unwrap());
        job.state = JobState::Active;
        job
    }

    #[test]
    fn test_chunks_cover_file_exactly() {
        let tmp = TempDir::new().unwrap();
        let mut job = active_job(tmp.path(), 1000, 1000);
        let transport = RecordingTransport::default();
        let sender = ChunkSender::new(300);

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(sender.send_chunk(&mut job, &transport, &crate::logger::NoopLogger).unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                ChunkOutcome::Sent(300),
                ChunkOutcome::Sent(300),
                ChunkOutcome::Sent(300),
                ChunkOutcome::Sent(100),
                ChunkOutcome::Exhausted
            ]
        );
        assert_eq!(job.offset, 1000);

        let sent: Vec<u8> = transport
            .frames
            .lock()
            .iter()
            .flat_map(|f| f[3..].to_vec())
            .collect();
        assert_eq!(sent, std::fs::read(&job.patch.path).unwrap());
    }

    #[test]
    fn test_progress_logged_once_per_decile() {
        let tmp = TempDir::new().unwrap();
        // 100-byte chunks over 10_000 bytes land ten chunks in each decile
        let mut job = active_job(tmp.path(), 10_000, 10_000);
        let transport = RecordingTransport::default();
        let logger = RecordingLogger::default();
        let sender = ChunkSender::new(100);
        while let ChunkOutcome::Sent(_) = sender.send_chunk(&mut job, &transport, &logger).unwrap() {}

        assert_eq!(*logger.percents.lock(), vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_progress_with_coarse_chunks() {
        let tmp = TempDir::new().unwrap();
        // 300/1000: 30, 60, 90, 100 -> each chunk crosses a new decile
        let mut job = active_job(tmp.path(), 1000, 1000);
        let transport = RecordingTransport::default();
        let logger = RecordingLogger::default();
        let sender = ChunkSender::new(300);
        while let ChunkOutcome::Sent(_) = sender.send_chunk(&mut job, &transport, &logger).unwrap() {}

        assert_eq!(*logger.percents.lock(), vec![30, 60, 90, 100]);
    }

    #[test]
    fn test_truncated_file_fails_job() {
        let tmp = TempDir::new().unwrap();
        // registry believed 1000 bytes, file now only holds 400
        let mut job = active_job(tmp.path(), 400, 1000);
        let transport = RecordingTransport::default();
        let sender = ChunkSender::new(300);

        assert!(sender.send_chunk(&mut job, &transport, &crate::logger::NoopLogger).is_ok());
        let err = sender
            .send_chunk(&mut job, &transport, &crate::logger::NoopLogger)
            .unwrap_err();
        assert!(matches!(err, PatchError::Truncated { offset: 300, expected: 300, got: 100 }));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.offset, 300);
    }

    #[test]
    fn test_transport_failure_fails_job() {
        let tmp = TempDir::new().unwrap();
        let mut job = active_job(tmp.path(), 1000, 1000);
        let sender = ChunkSender::new(300);
        let err = sender
            .send_chunk(&mut job, &FailingTransport, &crate::logger::NoopLogger)
            .unwrap_err();
        assert!(matches!(err, PatchError::Transport(_)));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.offset, 0);
    }

    #[test]
    fn test_full_queue_holds_offset_and_cursor() {
        let tmp = TempDir::new().unwrap();
        let mut job = active_job(tmp.path(), 1000, 1000);
        let transport = CongestedTransport::new(false);
        let logger = RecordingLogger::default();
        let sender = ChunkSender::new(300);

        // the frame is read and refused: the cursor must be rewound
        for _ in 0..3 {
            assert_eq!(
                sender.send_chunk(&mut job, &transport, &logger).unwrap(),
                ChunkOutcome::Backpressured
            );
        }
        assert_eq!(job.offset, 0);
        assert_eq!(job.state, JobState::Active);
        assert!(logger.percents.lock().is_empty());

        transport.open.store(true, Ordering::SeqCst);
        while let ChunkOutcome::Sent(_) = sender.send_chunk(&mut job, &transport, &logger).unwrap() {}
        let sent: Vec<u8> = transport.frames.lock().iter().flat_map(|f| f[3..].to_vec()).collect();
        assert_eq!(sent, std::fs::read(&job.patch.path).unwrap());
        assert_eq!(*logger.percents.lock(), vec![30, 60, 90, 100]);
    }

    #[test]
    fn test_unready_transport_skips_read() {
        let tmp = TempDir::new().unwrap();
        // file shorter than recorded: a read would fail the job as truncated
        let mut job = active_job(tmp.path(), 100, 1000);
        job.offset = 300;
        let transport = CongestedTransport::new(true);
        let sender = ChunkSender::new(300);

        assert_eq!(
            sender.send_chunk(&mut job, &transport, &crate::logger::NoopLogger).unwrap(),
            ChunkOutcome::Backpressured
        );
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.offset, 300);
        assert!(transport.frames.lock().is_empty());
    }

    #[test]
    fn test_percent_floor() {
        assert_eq!(percent(0, 1000), 0);
        assert_eq!(percent(999, 1000), 99);
        assert_eq!(percent(1000, 1000), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }
}
