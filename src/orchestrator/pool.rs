//! Bounded extraction pool with per-file timeouts.
//!
//! Jobs run on a rayon pool sized from the live `workers` tunable. Inside a
//! job the extractor itself runs on a short-lived helper thread so a hung
//! decoder can be abandoned: the pool slot waits on a channel with
//! `recv_timeout` and gives up once the budget is spent. The helper gets
//! the same budget as a [`Deadline`], so child processes it started are
//! killed and the helper winds down on its own. A late result from an
//! abandoned helper is dropped with its channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::fingerprint::{Deadline, ExtractionError, ExtractorSet, Fingerprint};
use crate::scanner::ContentFamily;

/// Fixed-size pool of extraction workers.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).finish()
    }
}

impl WorkerPool {
    /// Build a pool of `size` threads.
    ///
    /// # Errors
    ///
    /// Fails if the operating system refuses to create the threads.
    pub fn new(size: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let size = size.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("neardupe-worker-{i}"))
            .build()?;
        log::debug!("Extraction pool started with {size} workers");
        Ok(Self { pool, size })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }
}

/// Run one extraction with a wall-clock budget.
///
/// A panic inside the extractor is reported as
/// [`ExtractionError::Unsupported`]; running past `timeout` as
/// [`ExtractionError::Timeout`].
pub fn extract_with_timeout(
    extractors: &Arc<ExtractorSet>,
    path: &Path,
    family: ContentFamily,
    timeout: Duration,
) -> Result<Fingerprint, ExtractionError> {
    let (tx, rx) = bounded(1);
    let helper_extractors = Arc::clone(extractors);
    let helper_path = path.to_path_buf();
    let deadline = Deadline::after(timeout);

    let spawned = std::thread::Builder::new()
        .name("neardupe-extract".to_string())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                helper_extractors.extract_within(&helper_path, family, deadline)
            }));
            // the receiver is gone if the budget ran out
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return Err(ExtractionError::unreadable(
            path,
            format!("cannot start extraction thread: {e}"),
        ));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Err(ExtractionError::unsupported(
            path,
            "extractor panicked while decoding",
        )),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!(
                "Extraction of {} exceeded {:?}, abandoning it",
                path.display(),
                timeout
            );
            Err(deadline.timeout_error(path))
        }
    }
}
