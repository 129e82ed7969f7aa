//! The scan engine: session lifecycle on top of the store, orchestrator and
//! grouper.
//!
//! Every session run happens on its own background thread. The engine keeps
//! a table of active runs so `pause` and `cancel` can reach the run's
//! [`ScanControl`]; everything else is read from or written to the store, so
//! a fresh engine over the same database picks up where an earlier process
//! stopped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{NewSession, Progress, ScanSession, SessionError, SessionId, SessionResult, SessionStatus};
use crate::actions::{validate_preserves_copy, verify_unchanged, DeleteError, DeleteReport, FileOperations, MemberFailure};
use crate::duplicates::{DuplicateGroup, GroupId, Grouper, GrouperConfig};
use crate::fingerprint::ExtractorSet;
use crate::orchestrator::{
    control::num_cpus_fallback, Orchestrator, OrchestratorError, PhaseOutcome, ScanControl, Signal,
    DEFAULT_TIMEOUT,
};
use crate::progress::{ProgressCallback, PHASE_GROUPING};
use crate::scanner::{ContentFamily, RootPath, WalkerConfig};
use crate::store::{FileRecord, FingerprintStore, RecordId, RecordStatus};

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Engine-wide tunables. Sessions carry their own threshold.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Extraction workers for new runs
    pub workers: usize,
    /// Per-file extraction budget for new runs
    pub timeout: Duration,
    /// Grouping tunables; the threshold is overridden per session
    pub grouper: GrouperConfig,
    /// Directory walking
    pub walker: WalkerConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: num_cpus_fallback(),
            timeout: DEFAULT_TIMEOUT,
            grouper: GrouperConfig::default(),
            walker: WalkerConfig::default(),
        }
    }
}

struct ActiveRun {
    control: Arc<ScanControl>,
    handle: JoinHandle<SessionResult<SessionStatus>>,
}

/// What a run thread needs, cloned out of the engine.
#[derive(Clone)]
struct RunContext {
    store: Arc<FingerprintStore>,
    extractors: Arc<ExtractorSet>,
    settings: EngineSettings,
    progress: Option<Arc<dyn ProgressCallback>>,
}

/// Drives scan sessions.
pub struct ScanEngine {
    ctx: RunContext,
    active: Mutex<HashMap<SessionId, ActiveRun>>,
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("store", &self.ctx.store)
            .field("settings", &self.ctx.settings)
            .finish_non_exhaustive()
    }
}

impl ScanEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<FingerprintStore>, extractors: Arc<ExtractorSet>, settings: EngineSettings) -> Self {
        Self {
            ctx: RunContext {
                store,
                extractors,
                settings,
                progress: None,
            },
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Report run progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.ctx.progress = Some(callback);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<FingerprintStore> {
        &self.ctx.store
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Validate parameters and persist a new session in the `Created`
    /// state. Nothing is scanned until [`ScanEngine::start`].
    ///
    /// # Errors
    ///
    /// [`SessionError::Configuration`] for a threshold outside (0, 1], an
    /// empty or missing root, or no deduplicable family.
    pub fn create_session(
        &self,
        roots: Vec<RootPath>,
        families: Vec<ContentFamily>,
        threshold: f64,
    ) -> SessionResult<SessionId> {
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(SessionError::Configuration(format!(
                "threshold must be in (0, 1], got {threshold}"
            )));
        }
        if roots.is_empty() {
            return Err(SessionError::Configuration("no root paths given".into()));
        }
        let roots = roots
            .into_iter()
            .map(absolute_root)
            .collect::<SessionResult<Vec<_>>>()?;
        if families.is_empty() {
            return Err(SessionError::Configuration("no content families selected".into()));
        }
        if let Some(other) = families.iter().find(|f| !f.is_deduplicable()) {
            return Err(SessionError::Configuration(format!(
                "content family '{other}' is never deduplicated"
            )));
        }

        let session = self
            .ctx
            .store
            .insert_session(&NewSession::new(roots, families, threshold))
            .map_err(SessionError::Store)?;
        log::info!(
            "Created session {} ({} root(s), families: {})",
            session.id,
            session.roots.len(),
            session
                .families
                .iter()
                .map(ContentFamily::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(session.id)
    }

    /// Start a `Created` session on a background thread.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] unless the session is `Created`.
    pub fn start(&self, id: SessionId) -> SessionResult<()> {
        let mut active = self.active()?;
        let session = self.load(id)?;
        if active.contains_key(&id) || session.status != SessionStatus::Created {
            return Err(SessionError::InvalidTransition {
                session: id,
                status: session.status,
                action: "start",
            });
        }
        self.launch(&mut active, &session)
    }

    /// Ask a running session to pause.
    ///
    /// Returns without waiting: in-flight extractions finish first and the
    /// run persists `Paused` itself. Safe to call from a progress callback.
    /// Pausing an already paused session is a no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] for sessions that are `Created`
    /// or finished.
    pub fn pause(&self, id: SessionId) -> SessionResult<()> {
        {
            let active = self.active()?;
            if let Some(run) = active.get(&id) {
                if !run.handle.is_finished() {
                    run.control.request_pause();
                    log::info!("Session {id}: pause requested");
                    return Ok(());
                }
            }
        }

        let session = self.load(id)?;
        match session.status {
            SessionStatus::Paused => Ok(()),
            // left running by a process that died
            status if status.is_running() => self.set_status(id, SessionStatus::Paused, None),
            status => Err(SessionError::InvalidTransition {
                session: id,
                status,
                action: "pause",
            }),
        }
    }

    /// Resume a paused session, or one left running by a crashed process.
    ///
    /// Records stranded mid-extraction are retried; stored groups are
    /// dropped since new fingerprints may change them. Resuming a session
    /// that is already running is a no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::StoreCorruption`] when the store fails its integrity
    /// check (the session is marked `Failed`), and
    /// [`SessionError::InvalidTransition`] for other states.
    pub fn resume(&self, id: SessionId) -> SessionResult<()> {
        let draining = {
            let mut active = self.active()?;
            let running = active
                .get(&id)
                .map(|run| !run.handle.is_finished() && run.control.signal() == Signal::Run);
            match running {
                Some(true) => return Ok(()),
                Some(false) => active.remove(&id),
                None => None,
            }
        };
        // a paused run may still be finishing its in-flight files
        if let Some(run) = draining {
            let _ = join(id, run.handle);
        }

        let mut active = self.active()?;
        let session = self.load(id)?;
        if !(session.status == SessionStatus::Paused || session.status.is_running()) {
            return Err(SessionError::InvalidTransition {
                session: id,
                status: session.status,
                action: "resume",
            });
        }

        if let Err(e) = self.ctx.store.quick_check() {
            return Err(self.fail_if_corrupt(SessionError::from_store(id, e)));
        }
        let store_err = |e| SessionError::from_store(id, e);
        self.ctx.store.clear_groups(id).map_err(store_err)?;
        // walk the roots again so files changed or added while paused are
        // picked up; unchanged records keep their fingerprints
        self.ctx.store.set_enumerated(id, false).map_err(store_err)?;
        let session = self.load(id)?;
        log::info!("Resuming session {id}");
        self.launch(&mut active, &session)
    }

    /// Cancel a session. Running sessions stop after in-flight work drains;
    /// cancelling a cancelled session is a no-op.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] for completed or failed sessions.
    pub fn cancel(&self, id: SessionId) -> SessionResult<()> {
        {
            let active = self.active()?;
            if let Some(run) = active.get(&id) {
                if !run.handle.is_finished() {
                    run.control.request_cancel();
                    log::info!("Session {id}: cancel requested");
                    return Ok(());
                }
            }
        }

        let session = self.load(id)?;
        match session.status {
            SessionStatus::Cancelled => Ok(()),
            status if !status.is_terminal() => self.set_status(id, SessionStatus::Cancelled, None),
            status => Err(SessionError::InvalidTransition {
                session: id,
                status,
                action: "cancel",
            }),
        }
    }

    /// Block until the session's current run ends and return the status it
    /// left behind. Returns the stored status when nothing is running.
    ///
    /// # Errors
    ///
    /// The run's own error, if it failed.
    pub fn wait(&self, id: SessionId) -> SessionResult<SessionStatus> {
        // the run stays registered so pause and cancel can still reach it
        loop {
            let finished = {
                let mut active = self.lock_active()?;
                match active.get(&id) {
                    None => None,
                    Some(run) if run.handle.is_finished() => active.remove(&id),
                    Some(_) => {
                        drop(active);
                        std::thread::sleep(WAIT_POLL);
                        continue;
                    }
                }
            };
            return match finished {
                Some(run) => join(id, run.handle),
                None => Ok(self.load(id)?.status),
            };
        }
    }

    /// Scan a finished or paused session's roots again.
    ///
    /// Unchanged files keep their fingerprints. Files that failed with a
    /// timeout or I/O error are retried; with `force`, every file is
    /// extracted again.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] while the session is running or
    /// before it was ever started.
    pub fn rescan(&self, id: SessionId, force: bool) -> SessionResult<()> {
        let mut active = self.active()?;
        let session = self.load(id)?;
        let allowed = session.status.is_terminal() || session.status == SessionStatus::Paused;
        if active.contains_key(&id) || !allowed {
            return Err(SessionError::InvalidTransition {
                session: id,
                status: session.status,
                action: "rescan",
            });
        }

        let store_err = |e| SessionError::from_store(id, e);
        self.ctx.store.reset_for_rescan(id, force).map_err(store_err)?;
        self.ctx
            .store
            .update_status(id, SessionStatus::Created, None)
            .map_err(store_err)?;
        let session = self.load(id)?;
        log::info!("Rescanning session {id}{}", if force { " (forced)" } else { "" });
        self.launch(&mut active, &session)
    }

    /// Change the worker count of a running session.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] when the session is not running
    /// in this engine.
    pub fn set_workers(&self, id: SessionId, workers: usize) -> SessionResult<()> {
        self.with_control(id, "set workers of", |c| c.set_workers(workers))
    }

    /// Change the per-file extraction budget of a running session.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidTransition`] when the session is not running
    /// in this engine.
    pub fn set_timeout(&self, id: SessionId, timeout: Duration) -> SessionResult<()> {
        self.with_control(id, "set timeout of", |c| c.set_timeout(timeout))
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Progress counters, derived from the store.
    pub fn get_progress(&self, id: SessionId) -> SessionResult<Progress> {
        let session = self.load(id)?;
        let store_err = |e| SessionError::from_store(id, e);
        let families = self.ctx.store.family_counts(id).map_err(store_err)?;
        let errors = self.ctx.store.error_counts(id).map_err(store_err)?;
        Ok(Progress::from_counts(&session, families, &errors))
    }

    /// Duplicate groups of one family.
    ///
    /// Groups are computed on first request and stored; later requests
    /// return the stored groups until the session is resumed or rescanned.
    /// Paused, cancelled and failed sessions yield groups over whatever
    /// fingerprints exist.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReady`] while the family is still being extracted
    /// or the session was never started.
    pub fn get_groups(&self, id: SessionId, family: ContentFamily) -> SessionResult<Vec<DuplicateGroup>> {
        let session = self.load(id)?;
        if !session.includes(family) {
            return Ok(Vec::new());
        }
        if session.status == SessionStatus::Created {
            return Err(SessionError::NotReady { session: id, family });
        }
        let store_err = |e| self.fail_if_corrupt(SessionError::from_store(id, e));
        if session.status.is_running() {
            let settled = self
                .get_progress(id)?
                .family(family)
                .is_settled();
            if !session.enumerated || !settled {
                return Err(SessionError::NotReady { session: id, family });
            }
        }

        if let Some(groups) = self.ctx.store.load_groups(id, family).map_err(store_err)? {
            return Ok(groups);
        }
        let mut groups =
            group_family(&self.ctx, &session, family).map_err(|e| self.fail_if_corrupt(e))?;
        self.ctx
            .store
            .replace_groups(id, family, session.threshold, &mut groups)
            .map_err(store_err)?;
        Ok(groups)
    }

    /// Groups over the fingerprints extracted so far, without waiting for
    /// the family to settle and without storing them.
    pub fn preview_groups(&self, id: SessionId, family: ContentFamily) -> SessionResult<Vec<DuplicateGroup>> {
        let session = self.load(id)?;
        if !session.includes(family) {
            return Ok(Vec::new());
        }
        group_family(&self.ctx, &session, family).map_err(|e| self.fail_if_corrupt(e))
    }

    /// Extracted fingerprints of one family, for external consumers.
    pub fn fingerprints(&self, id: SessionId, family: ContentFamily) -> SessionResult<Vec<FileRecord>> {
        self.load(id)?;
        let records = self
            .ctx
            .store
            .list_by_family(id, family)
            .collect_records()
            .map_err(|e| self.fail_if_corrupt(SessionError::from_store(id, e)))?;
        Ok(records
            .into_iter()
            .filter(|r| r.present && r.status == RecordStatus::Done)
            .collect())
    }

    /// Records whose extraction failed, with their error kind.
    pub fn failed_records(&self, id: SessionId) -> SessionResult<Vec<FileRecord>> {
        self.load(id)?;
        let records = self
            .ctx
            .store
            .failed_records(id)
            .map_err(|e| self.fail_if_corrupt(SessionError::from_store(id, e)))?;
        Ok(records.into_iter().filter(|r| r.present).collect())
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> SessionResult<Vec<ScanSession>> {
        self.ctx.store.list_sessions().map_err(SessionError::Store)
    }

    /// One session.
    pub fn session(&self, id: SessionId) -> SessionResult<ScanSession> {
        self.load(id)
    }

    /// Drop every finished session from the store. Returns how many were
    /// removed.
    pub fn clear_cache(&self) -> SessionResult<usize> {
        self.ctx.store.clear_cache().map_err(SessionError::Store)
    }

    // ── Deletion ─────────────────────────────────────────────────

    /// Delete members of a group through `ops`.
    ///
    /// Each member is checked against the size and mtime recorded at scan
    /// time first; changed or missing files are skipped. Deleted members
    /// leave the group and their records are marked absent.
    ///
    /// # Errors
    ///
    /// [`SessionError::GroupNotFound`] for unknown groups, and
    /// [`SessionError::Delete`] when every member would be deleted.
    pub fn delete_members(
        &self,
        group_id: GroupId,
        member_ids: &[RecordId],
        ops: &dyn FileOperations,
    ) -> SessionResult<DeleteReport> {
        let (session, group) = self
            .ctx
            .store
            .group(group_id)
            .map_err(SessionError::Store)?
            .ok_or(SessionError::GroupNotFound(group_id))?;
        validate_preserves_copy(member_ids, &group.members).map_err(SessionError::Delete)?;
        let store_err = |e| SessionError::from_store(session, e);

        let mut report = DeleteReport::default();
        for &record in member_ids {
            if report.deleted.contains(&record) {
                continue;
            }
            let Some(member) = group.member(record) else {
                report.skipped.push(MemberFailure {
                    record,
                    path: None,
                    reason: format!("not a member of group {group_id}"),
                });
                continue;
            };

            let outcome = verify_unchanged(member).and_then(|()| ops.delete(&member.path));
            match outcome {
                Ok(()) => {
                    self.ctx.store.remove_member(group_id, record).map_err(store_err)?;
                    self.ctx.store.mark_absent(record).map_err(store_err)?;
                    report.bytes_freed += member.size;
                    report.deleted.push(record);
                }
                Err(e @ (DeleteError::Modified(_) | DeleteError::NotFound(_))) => {
                    report.skipped.push(MemberFailure {
                        record,
                        path: Some(member.path.clone()),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("{e}");
                    report.failed.push(MemberFailure {
                        record,
                        path: Some(member.path.clone()),
                        reason: e.to_string(),
                    });
                }
            }
        }
        log::info!("Group {group_id}: {}", report.summary());
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────

    fn lock_active(&self) -> SessionResult<MutexGuard<'_, HashMap<SessionId, ActiveRun>>> {
        self.active
            .lock()
            .map_err(|_| SessionError::Worker("active run table poisoned".into()))
    }

    /// The active run table, with finished runs reaped.
    fn active(&self) -> SessionResult<MutexGuard<'_, HashMap<SessionId, ActiveRun>>> {
        let mut active = self.lock_active()?;
        let finished: Vec<SessionId> = active
            .iter()
            .filter(|(_, run)| run.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(run) = active.remove(&id) {
                if let Err(e) = join(id, run.handle) {
                    log::debug!("Session {id} run ended with: {e}");
                }
            }
        }
        Ok(active)
    }

    fn load(&self, id: SessionId) -> SessionResult<ScanSession> {
        self.ctx
            .store
            .load_session(id)
            .map_err(|e| SessionError::from_store(id, e))?
            .ok_or(SessionError::NotFound(id))
    }

    fn set_status(&self, id: SessionId, status: SessionStatus, error: Option<&str>) -> SessionResult<()> {
        self.ctx
            .store
            .update_status(id, status, error)
            .map_err(|e| SessionError::from_store(id, e))
    }

    /// Corruption is fatal to the session: record it as `Failed` before
    /// handing the error back.
    fn fail_if_corrupt(&self, error: SessionError) -> SessionError {
        if let SessionError::StoreCorruption { session, .. } = error {
            log::error!("Session {session}: {error}");
            if let Err(e) = self
                .ctx
                .store
                .update_status(session, SessionStatus::Failed, Some(&error.to_string()))
            {
                log::error!("Session {session}: could not record failure: {e}");
            }
        }
        error
    }

    fn with_control(
        &self,
        id: SessionId,
        action: &'static str,
        apply: impl FnOnce(&ScanControl),
    ) -> SessionResult<()> {
        {
            let active = self.active()?;
            if let Some(run) = active.get(&id) {
                apply(&run.control);
                return Ok(());
            }
        }
        let session = self.load(id)?;
        Err(SessionError::InvalidTransition {
            session: id,
            status: session.status,
            action,
        })
    }

    fn launch(
        &self,
        active: &mut HashMap<SessionId, ActiveRun>,
        session: &ScanSession,
    ) -> SessionResult<()> {
        let id = session.id;
        let initial = if session.enumerated {
            SessionStatus::Processing
        } else {
            SessionStatus::Enumerating
        };
        self.set_status(id, initial, None)?;

        let control = Arc::new(ScanControl::new(
            self.ctx.settings.workers,
            self.ctx.settings.timeout,
        ));
        let ctx = self.ctx.clone();
        let run_control = Arc::clone(&control);
        let handle = std::thread::Builder::new()
            .name(format!("neardupe-session-{id}"))
            .spawn(move || run(&ctx, id, &run_control))
            .map_err(|e| {
                let _ = self
                    .ctx
                    .store
                    .update_status(id, SessionStatus::Failed, Some(&e.to_string()));
                SessionError::Worker(e.to_string())
            })?;
        active.insert(id, ActiveRun { control, handle });
        Ok(())
    }
}

fn absolute_root(root: RootPath) -> SessionResult<RootPath> {
    let path: PathBuf = if root.path.is_absolute() {
        root.path.clone()
    } else {
        std::env::current_dir()
            .map_err(|e| SessionError::Configuration(format!("cannot resolve {}: {e}", root.path.display())))?
            .join(&root.path)
    };
    if !path.is_dir() {
        return Err(SessionError::Configuration(format!(
            "root {} is not an existing directory",
            root.path.display()
        )));
    }
    Ok(RootPath::new(path, root.include_subdirs))
}

fn join(id: SessionId, handle: JoinHandle<SessionResult<SessionStatus>>) -> SessionResult<SessionStatus> {
    handle
        .join()
        .unwrap_or_else(|_| Err(SessionError::Worker(format!("session {id} worker panicked"))))
}

fn group_family(ctx: &RunContext, session: &ScanSession, family: ContentFamily) -> SessionResult<Vec<DuplicateGroup>> {
    let records = ctx
        .store
        .list_by_family(session.id, family)
        .collect_records()
        .map_err(|e| SessionError::from_store(session.id, e))?;
    let grouper = Grouper::new(ctx.settings.grouper.with_threshold(session.threshold));
    Ok(grouper.group(family, records))
}

/// Body of a session's background thread. Any error marks the session
/// `Failed`.
fn run(ctx: &RunContext, id: SessionId, control: &Arc<ScanControl>) -> SessionResult<SessionStatus> {
    match drive(ctx, id, control) {
        Ok(status) => {
            log::info!("Session {id} is {status}");
            Ok(status)
        }
        Err(e) => {
            log::error!("Session {id} failed: {e}");
            if let Err(store_error) = ctx
                .store
                .update_status(id, SessionStatus::Failed, Some(&e.to_string()))
            {
                log::error!("Session {id}: could not record failure: {store_error}");
            }
            Err(e)
        }
    }
}

fn drive(ctx: &RunContext, id: SessionId, control: &Arc<ScanControl>) -> SessionResult<SessionStatus> {
    let store = &ctx.store;
    let store_err = |e| SessionError::from_store(id, e);
    let orch_err = |e: OrchestratorError| match e {
        OrchestratorError::Store(e) => SessionError::from_store(id, e),
        OrchestratorError::Pool(e) => SessionError::Worker(e.to_string()),
    };
    let stopped = |outcome: PhaseOutcome| -> SessionResult<Option<SessionStatus>> {
        let status = match outcome {
            PhaseOutcome::Finished => return Ok(None),
            PhaseOutcome::Paused => SessionStatus::Paused,
            PhaseOutcome::Cancelled => SessionStatus::Cancelled,
        };
        store.update_status(id, status, None).map_err(store_err)?;
        Ok(Some(status))
    };

    let mut session = store
        .load_session(id)
        .map_err(store_err)?
        .ok_or(SessionError::NotFound(id))?;
    store.reset_in_progress(id).map_err(store_err)?;

    let orchestrator = Orchestrator::new(
        Arc::clone(store),
        Arc::clone(&ctx.extractors),
        Arc::clone(control),
        ctx.settings.walker.clone(),
    )
    .with_progress(ctx.progress.clone());

    if !session.enumerated {
        store
            .update_status(id, SessionStatus::Enumerating, None)
            .map_err(store_err)?;
        let (outcome, _) = orchestrator.enumerate(&session).map_err(orch_err)?;
        if let Some(status) = stopped(outcome)? {
            return Ok(status);
        }
        store.set_enumerated(id, true).map_err(store_err)?;
        session.enumerated = true;
    }

    store
        .update_status(id, SessionStatus::Processing, None)
        .map_err(store_err)?;
    let counts = store.family_counts(id).map_err(store_err)?;
    let total: u64 = counts.iter().map(|c| c.discovered()).sum();
    let processed: u64 = counts.iter().map(|c| c.processed()).sum();
    let outcome = orchestrator
        .process(
            &session,
            usize::try_from(processed).unwrap_or(usize::MAX),
            usize::try_from(total).unwrap_or(usize::MAX),
        )
        .map_err(orch_err)?;
    if let Some(status) = stopped(outcome)? {
        return Ok(status);
    }

    if let Some(ref cb) = ctx.progress {
        cb.on_phase_start(PHASE_GROUPING, session.families.len());
    }
    for (index, &family) in session.families.iter().enumerate() {
        let interrupted = match control.signal() {
            Signal::Run => None,
            Signal::Pause => Some(PhaseOutcome::Paused),
            Signal::Cancel => Some(PhaseOutcome::Cancelled),
        };
        if let Some(outcome) = interrupted {
            if let Some(status) = stopped(outcome)? {
                return Ok(status);
            }
        }
        let mut groups = group_family(ctx, &session, family)?;
        store
            .replace_groups(id, family, session.threshold, &mut groups)
            .map_err(store_err)?;
        log::info!("Session {id}: {} {family} group(s)", groups.len());
        if let Some(ref cb) = ctx.progress {
            cb.on_progress(index + 1, family.as_str());
        }
    }
    if let Some(ref cb) = ctx.progress {
        cb.on_phase_end(PHASE_GROUPING);
    }

    store
        .update_status(id, SessionStatus::Completed, None)
        .map_err(store_err)?;
    Ok(SessionStatus::Completed)
}
