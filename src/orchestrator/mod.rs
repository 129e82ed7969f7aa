//! Scan orchestration: enumeration and parallel extraction.
//!
//! The [`Orchestrator`] drives the two working phases of a session:
//!
//! 1. **Enumerating**: walk every root, classify files by extension and
//!    register the ones of a selected family as pending records.
//! 2. **Processing**: claim pending records one at a time and hand them to
//!    the [`WorkerPool`]; results flow back over a channel and are written
//!    to the store as they arrive.
//!
//! Both phases poll a shared [`ScanControl`] between files, so pause and
//! cancel take effect without interrupting an extraction already running.
//! Neither phase holds any state the store does not also hold: a run that
//! stops for any reason can be picked up again from the store alone.

pub mod control;
pub mod pool;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

pub use control::{ScanControl, Signal, DEFAULT_TIMEOUT};
pub use pool::{extract_with_timeout, WorkerPool};

use crate::fingerprint::{ExtractionError, ExtractorSet, Fingerprint};
use crate::progress::{ProgressCallback, PHASE_ENUMERATING, PHASE_PROCESSING};
use crate::scanner::{ContentFamily, FileIdentity, Walker, WalkerConfig};
use crate::session::ScanSession;
use crate::store::{Enumerated, FileRecord, FingerprintStore, StoreError};

/// How often the dispatch loop re-checks the control block while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that stop a phase.
#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The extraction pool could not be built.
    #[error("failed to start extraction workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// All work of the phase is done
    Finished,
    /// Stopped early by a pause request
    Paused,
    /// Stopped early by a cancel request
    Cancelled,
}

impl PhaseOutcome {
    fn interrupted(signal: Signal) -> Option<Self> {
        match signal {
            Signal::Run => None,
            Signal::Pause => Some(Self::Paused),
            Signal::Cancel => Some(Self::Cancelled),
        }
    }
}

/// Counters for one enumeration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationStats {
    /// Files registered for the first time
    pub inserted: usize,
    /// Known files with unchanged size and mtime
    pub unchanged: usize,
    /// Known files that changed and must be re-extracted
    pub invalidated: usize,
    /// Files satisfied from another session's fingerprints
    pub reused: usize,
    /// Files outside the selected families
    pub skipped: usize,
    /// Entries the walker could not read
    pub walk_errors: usize,
}

impl EnumerationStats {
    fn record(&mut self, outcome: Enumerated) {
        match outcome {
            Enumerated::Inserted => self.inserted += 1,
            Enumerated::Unchanged => self.unchanged += 1,
            Enumerated::Invalidated => self.invalidated += 1,
            Enumerated::Reused => self.reused += 1,
        }
    }

    /// Files registered with the session.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.inserted + self.unchanged + self.invalidated + self.reused
    }
}

/// A finished extraction travelling back to the dispatch loop.
struct Completion {
    record: FileRecord,
    identity: FileIdentity,
    outcome: Result<Fingerprint, ExtractionError>,
}

/// Runs the enumeration and processing phases of one session.
pub struct Orchestrator {
    store: Arc<FingerprintStore>,
    extractors: Arc<ExtractorSet>,
    control: Arc<ScanControl>,
    walker: WalkerConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(
        store: Arc<FingerprintStore>,
        extractors: Arc<ExtractorSet>,
        control: Arc<ScanControl>,
        walker: WalkerConfig,
    ) -> Self {
        Self {
            store,
            extractors,
            control,
            walker,
            progress: None,
        }
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Option<Arc<dyn ProgressCallback>>) -> Self {
        self.progress = callback;
        self
    }

    /// Walk the session's roots and register every file of a selected
    /// family.
    ///
    /// # Errors
    ///
    /// Only store failures abort enumeration; unreadable directory entries
    /// are logged and counted.
    pub fn enumerate(
        &self,
        session: &ScanSession,
    ) -> Result<(PhaseOutcome, EnumerationStats), OrchestratorError> {
        let mut stats = EnumerationStats::default();
        if let Some(ref cb) = self.progress {
            cb.on_phase_start(PHASE_ENUMERATING, 0);
        }
        log::info!(
            "Session {}: enumerating {} root(s)",
            session.id,
            session.roots.len()
        );

        for root in &session.roots {
            let walker = Walker::new(root, self.walker.clone())
                .with_shutdown_flag(self.control.stop_flag());
            for entry in walker.walk() {
                if let Some(outcome) = PhaseOutcome::interrupted(self.control.signal()) {
                    log::info!("Session {}: enumeration interrupted", session.id);
                    return Ok((outcome, stats));
                }
                let identity = match entry {
                    Ok(identity) => identity,
                    Err(e) => {
                        log::warn!("{e}");
                        stats.walk_errors += 1;
                        continue;
                    }
                };

                let family = ContentFamily::from_path(&identity.path);
                if !family.is_deduplicable() || !session.includes(family) {
                    stats.skipped += 1;
                    continue;
                }
                let outcome = self.store.enumerate_file(session.id, &identity, family)?;
                stats.record(outcome);
                if let Some(ref cb) = self.progress {
                    cb.on_progress(stats.registered(), &identity.path.to_string_lossy());
                }
            }
        }

        // a stop request may have ended the walk early without an entry to
        // observe it on
        if let Some(outcome) = PhaseOutcome::interrupted(self.control.signal()) {
            return Ok((outcome, stats));
        }
        if let Some(ref cb) = self.progress {
            cb.on_phase_end(PHASE_ENUMERATING);
        }
        log::info!(
            "Session {}: {} files registered ({} new, {} changed, {} cached), {} skipped, {} unreadable entries",
            session.id,
            stats.registered(),
            stats.inserted,
            stats.invalidated,
            stats.reused,
            stats.skipped,
            stats.walk_errors
        );
        Ok((PhaseOutcome::Finished, stats))
    }

    /// Extract every pending record of the session.
    ///
    /// `processed` and `total` seed the progress display with counts from
    /// earlier runs.
    ///
    /// # Errors
    ///
    /// Store failures abort processing after in-flight work drains.
    pub fn process(
        &self,
        session: &ScanSession,
        processed: usize,
        total: usize,
    ) -> Result<PhaseOutcome, OrchestratorError> {
        if let Some(ref cb) = self.progress {
            cb.on_phase_start(PHASE_PROCESSING, total);
        }
        log::info!(
            "Session {}: extracting fingerprints ({} of {} already processed)",
            session.id,
            processed,
            total
        );

        let (done_tx, done_rx) = unbounded::<Completion>();
        let mut pool = WorkerPool::new(self.control.workers())?;
        let mut processed = processed;
        let mut in_flight = 0usize;
        let mut exhausted = false;
        let mut failure: Option<StoreError> = None;

        loop {
            while let Ok(completion) = done_rx.try_recv() {
                in_flight -= 1;
                self.complete(session, completion, &mut processed, &mut failure);
            }

            let signal = self.control.signal();
            let stopping = signal != Signal::Run || exhausted || failure.is_some();
            if stopping {
                if in_flight == 0 {
                    break;
                }
                self.wait_one(&done_rx, session, &mut in_flight, &mut processed, &mut failure);
                continue;
            }

            let desired = self.control.workers();
            if desired != pool.size() {
                if in_flight == 0 {
                    log::info!("Resizing extraction pool from {} to {desired} workers", pool.size());
                    pool = WorkerPool::new(desired)?;
                } else {
                    self.wait_one(&done_rx, session, &mut in_flight, &mut processed, &mut failure);
                    continue;
                }
            }

            if in_flight >= pool.size() {
                self.wait_one(&done_rx, session, &mut in_flight, &mut processed, &mut failure);
                continue;
            }

            match self.store.claim_next(session.id) {
                Ok(Some(record)) => {
                    in_flight += 1;
                    self.dispatch(&pool, record, done_tx.clone());
                }
                Ok(None) => exhausted = true,
                Err(e) => failure = Some(e),
            }
        }

        if let Some(e) = failure {
            return Err(e.into());
        }
        if let Some(outcome) = PhaseOutcome::interrupted(self.control.signal()) {
            log::info!("Session {}: processing stopped ({outcome:?})", session.id);
            return Ok(outcome);
        }
        if let Some(ref cb) = self.progress {
            cb.on_phase_end(PHASE_PROCESSING);
        }
        Ok(PhaseOutcome::Finished)
    }

    fn dispatch(&self, pool: &WorkerPool, record: FileRecord, done: crossbeam_channel::Sender<Completion>) {
        let extractors = Arc::clone(&self.extractors);
        let timeout = self.control.timeout();
        pool.spawn(move || {
            // re-read metadata so the stored identity matches the bytes
            // actually fingerprinted
            let identity =
                FileIdentity::probe(&record.identity.path).unwrap_or_else(|_| record.identity.clone());
            let outcome = extract_with_timeout(&extractors, &record.identity.path, record.family, timeout);
            let _ = done.send(Completion {
                record,
                identity,
                outcome,
            });
        });
    }

    fn wait_one(
        &self,
        done_rx: &Receiver<Completion>,
        session: &ScanSession,
        in_flight: &mut usize,
        processed: &mut usize,
        failure: &mut Option<StoreError>,
    ) {
        match done_rx.recv_timeout(POLL_INTERVAL) {
            Ok(completion) => {
                *in_flight -= 1;
                self.complete(session, completion, processed, failure);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // every sender lives in a queued job; this only happens if
                // the pool dropped them
                log::error!("Extraction pool lost {} job(s)", *in_flight);
                *in_flight = 0;
            }
        }
    }

    fn complete(
        &self,
        session: &ScanSession,
        completion: Completion,
        processed: &mut usize,
        failure: &mut Option<StoreError>,
    ) {
        let Completion {
            record,
            identity,
            outcome,
        } = completion;
        if let Err(ref e) = outcome {
            log::warn!("{e}");
        }
        match self.store.upsert(session.id, &identity, &outcome) {
            Ok(_) => {
                *processed += 1;
                if let Some(ref cb) = self.progress {
                    cb.on_progress(*processed, &record.identity.path.to_string_lossy());
                }
            }
            Err(e) => {
                log::error!(
                    "Failed to store result for {}: {e}",
                    record.identity.path.display()
                );
                if failure.is_none() {
                    *failure = Some(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::document::TextExtractor;
    use crate::scanner::RootPath;
    use crate::session::NewSession;
    use crate::store::RecordStatus;
    use std::fs;
    use std::path::Path;

    struct Words;

    impl TextExtractor for Words {
        fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
            fs::read_to_string(path).map_err(|e| ExtractionError::from_io(path, &e))
        }
    }

    fn setup(dir: &Path, files: usize) -> (Arc<FingerprintStore>, ScanSession) {
        for i in 0..files {
            fs::write(dir.join(format!("{i}.txt")), format!("document number {i} body")).unwrap();
        }
        fs::write(dir.join("notes.bin"), [0u8; 4]).unwrap();
        let store = Arc::new(FingerprintStore::open_in_memory().unwrap());
        let session = store
            .insert_session(&NewSession::new(
                vec![RootPath::new(dir, true)],
                vec![ContentFamily::Document],
                0.9,
            ))
            .unwrap();
        (store, session)
    }

    fn orchestrator(store: &Arc<FingerprintStore>, control: Arc<ScanControl>) -> Orchestrator {
        let extractors = Arc::new(ExtractorSet::default().with_text_extractor(Arc::new(Words)));
        Orchestrator::new(Arc::clone(store), extractors, control, WalkerConfig::default())
    }

    #[test]
    fn test_enumerate_then_process() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = setup(dir.path(), 5);
        let control = Arc::new(ScanControl::new(2, Duration::from_secs(10)));
        let orch = orchestrator(&store, control);

        let (outcome, stats) = orch.enumerate(&session).unwrap();
        assert_eq!(outcome, PhaseOutcome::Finished);
        assert_eq!(stats.inserted, 5);
        assert_eq!(stats.skipped, 1);

        assert_eq!(orch.process(&session, 0, 5).unwrap(), PhaseOutcome::Finished);
        let records = store
            .list_by_family(session.id, ContentFamily::Document)
            .collect_records()
            .unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.status == RecordStatus::Done));
    }

    #[test]
    fn test_paused_control_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = setup(dir.path(), 3);
        let control = Arc::new(ScanControl::new(1, Duration::from_secs(10)));
        let orch = orchestrator(&store, Arc::clone(&control));
        orch.enumerate(&session).unwrap();

        control.request_pause();
        assert_eq!(orch.process(&session, 0, 3).unwrap(), PhaseOutcome::Paused);
        let counts = store.family_counts(session.id).unwrap();
        assert_eq!(counts[0].pending, 3);
    }

    #[test]
    fn test_cancel_during_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = setup(dir.path(), 3);
        let control = Arc::new(ScanControl::new(1, Duration::from_secs(10)));
        control.request_cancel();
        let orch = orchestrator(&store, control);
        let (outcome, stats) = orch.enumerate(&session).unwrap();
        assert_eq!(outcome, PhaseOutcome::Cancelled);
        assert_eq!(stats.registered(), 0);
    }

    #[test]
    fn test_pool_resize_between_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let (store, session) = setup(dir.path(), 6);
        let control = Arc::new(ScanControl::new(1, Duration::from_secs(10)));
        let orch = orchestrator(&store, Arc::clone(&control));
        orch.enumerate(&session).unwrap();
        control.set_workers(3);
        assert_eq!(orch.process(&session, 0, 6).unwrap(), PhaseOutcome::Finished);
        assert_eq!(store.family_counts(session.id).unwrap()[0].done, 6);
    }
}
