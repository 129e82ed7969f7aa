//! SQLite-backed fingerprint store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::record::{encode_fingerprint, Enumerated, RawRecord, RECORD_COLUMNS};
use super::{FamilySnapshot, FileRecord, RecordId, RecordStatus, StoreError, StoreResult};
use crate::fingerprint::{ErrorKind, ExtractionError, Fingerprint};
use crate::scanner::{ContentFamily, FileIdentity, RootPath};
use crate::session::{FamilyProgress, NewSession, ScanSession, SessionId, SessionStatus};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// Persistent table of file records, fingerprints, sessions and groups.
///
/// The connection sits behind a mutex that is held for one statement or
/// transaction at a time and never during extraction.
pub struct FingerprintStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn size_value(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn timestamp(text: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{text}': {e}")))
}

impl FingerprintStore {
    /// Open or create the store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the file is not
    /// a database, or the schema cannot be applied.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        log::debug!("Opened fingerprint store at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Database file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        conn.execute_batch(include_str!("schema.sql"))?;
        log::trace!("Schema initialized (version {SCHEMA_VERSION})");
        Ok(())
    }

    pub(crate) fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run SQLite's integrity check.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupt`] when the check reports any problem.
    pub fn quick_check(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if result == "ok" {
            Ok(())
        } else {
            Err(StoreError::Corrupt(format!("integrity check failed: {result}")))
        }
    }

    // ── Sessions ─────────────────────────────────────────────────

    /// Persist a new session in the `Created` state.
    pub fn insert_session(&self, new: &NewSession) -> StoreResult<ScanSession> {
        let roots = serde_json::to_string(&new.roots)
            .map_err(|e| StoreError::Corrupt(format!("cannot serialize roots: {e}")))?;
        let mut families = new.families.clone();
        families.sort();
        families.dedup();
        let families_json = serde_json::to_string(&families)
            .map_err(|e| StoreError::Corrupt(format!("cannot serialize families: {e}")))?;
        let now = Utc::now();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scan_session (roots, families, threshold, status, enumerated, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![
                roots,
                families_json,
                new.threshold,
                SessionStatus::Created.as_str(),
                now.to_rfc3339()
            ],
        )?;
        let id = SessionId(conn.last_insert_rowid());
        log::debug!("Created session {id}");
        Ok(ScanSession {
            id,
            roots: new.roots.clone(),
            families,
            threshold: new.threshold,
            status: SessionStatus::Created,
            enumerated: false,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Load a session, `None` if it does not exist.
    pub fn load_session(&self, id: SessionId) -> StoreResult<Option<ScanSession>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT id, roots, families, threshold, status, enumerated, error, \
                 created_at, updated_at FROM scan_session WHERE id = ?1",
                params![id.0],
                RawSession::from_row,
            )
            .optional()?;
        raw.map(RawSession::decode).transpose()
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> StoreResult<Vec<ScanSession>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, roots, families, threshold, status, enumerated, error, \
             created_at, updated_at FROM scan_session ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([], RawSession::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawSession::decode).collect()
    }

    /// Record a status change and optional failure reason.
    pub fn update_status(
        &self,
        id: SessionId,
        status: SessionStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scan_session SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error, Utc::now().to_rfc3339(), id.0],
        )?;
        log::trace!("Session {id} is now {status}");
        Ok(())
    }

    /// Mark whether enumeration walked every root to the end.
    pub fn set_enumerated(&self, id: SessionId, enumerated: bool) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE scan_session SET enumerated = ?1, updated_at = ?2 WHERE id = ?3",
            params![enumerated, Utc::now().to_rfc3339(), id.0],
        )?;
        Ok(())
    }

    /// Delete a session with its records and groups.
    pub fn delete_session(&self, id: SessionId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM scan_session WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }

    // ── Records ──────────────────────────────────────────────────

    /// Register a file found by enumeration.
    ///
    /// New and changed files become pending unless another session already
    /// holds a finished fingerprint for the exact same identity, in which
    /// case it is copied. Every enumerated record is marked present.
    pub fn enumerate_file(
        &self,
        session: SessionId,
        identity: &FileIdentity,
        family: ContentFamily,
    ) -> StoreResult<Enumerated> {
        let path = path_text(&identity.path);
        let size = size_value(identity.size);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<(i64, i64, i64)> = tx
            .query_row(
                "SELECT id, size, mtime_ns FROM file_record WHERE session_id = ?1 AND path = ?2",
                params![session.0, path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let cached: Option<(String, String)> = if existing
            .is_some_and(|(_, s, m)| s == size && m == identity.mtime_ns)
        {
            None
        } else {
            tx.query_row(
                "SELECT fingerprint, checksum FROM file_record \
                 WHERE path = ?1 AND size = ?2 AND mtime_ns = ?3 AND family = ?4 \
                   AND status = 'done' AND session_id != ?5 \
                 ORDER BY id DESC LIMIT 1",
                params![path, size, identity.mtime_ns, family.as_str(), session.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };
        let (status, fingerprint, checksum) = match &cached {
            Some((fp, sum)) => (RecordStatus::Done, Some(fp.as_str()), Some(sum.as_str())),
            None => (RecordStatus::Pending, None, None),
        };

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO file_record (session_id, path, size, mtime_ns, family, status, \
                     fingerprint, checksum, present) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
                    params![
                        session.0,
                        path,
                        size,
                        identity.mtime_ns,
                        family.as_str(),
                        status.as_str(),
                        fingerprint,
                        checksum
                    ],
                )?;
                if cached.is_some() {
                    Enumerated::Reused
                } else {
                    Enumerated::Inserted
                }
            }
            Some((id, old_size, old_mtime)) if old_size == size && old_mtime == identity.mtime_ns => {
                tx.execute("UPDATE file_record SET present = 1 WHERE id = ?1", params![id])?;
                Enumerated::Unchanged
            }
            Some((id, _, _)) => {
                tx.execute(
                    "UPDATE file_record SET size = ?1, mtime_ns = ?2, family = ?3, status = ?4, \
                     fingerprint = ?5, checksum = ?6, error_kind = NULL, error_detail = NULL, \
                     present = 1 WHERE id = ?7",
                    params![
                        size,
                        identity.mtime_ns,
                        family.as_str(),
                        status.as_str(),
                        fingerprint,
                        checksum,
                        id
                    ],
                )?;
                if cached.is_some() {
                    Enumerated::Reused
                } else {
                    Enumerated::Invalidated
                }
            }
        };
        tx.commit()?;
        if outcome == Enumerated::Reused {
            log::trace!("Reusing cached fingerprint for {}", identity.path.display());
        }
        Ok(outcome)
    }

    /// Atomically move the oldest pending record of a session to
    /// `InProgress` and return it.
    pub fn claim_next(&self, session: SessionId) -> StoreResult<Option<FileRecord>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let raw = tx
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_record \
                     WHERE session_id = ?1 AND status = 'pending' AND present = 1 \
                     ORDER BY id LIMIT 1"
                ),
                params![session.0],
                RawRecord::from_row,
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE file_record SET status = 'in_progress' WHERE id = ?1 AND status = 'pending'",
            params![raw.id],
        )?;
        tx.commit()?;

        let mut record = raw.decode()?;
        record.status = RecordStatus::InProgress;
        log::trace!("Claimed record {} ({})", record.id, record.identity.path.display());
        Ok(Some(record))
    }

    /// Store the outcome of an extraction for `identity`, inserting the
    /// record if the session does not know the path yet.
    pub fn upsert(
        &self,
        session: SessionId,
        identity: &FileIdentity,
        outcome: &Result<Fingerprint, ExtractionError>,
    ) -> StoreResult<RecordId> {
        let path = path_text(&identity.path);
        let (family, status, encoded, error_kind, error_detail) = match outcome {
            Ok(fp) => (fp.family(), RecordStatus::Done, Some(encode_fingerprint(fp)?), None, None),
            Err(e) => (
                ContentFamily::from_path(&identity.path),
                RecordStatus::Failed,
                None,
                Some(e.kind().as_str()),
                Some(e.detail()),
            ),
        };
        let (json, checksum) = match &encoded {
            Some(e) => (Some(e.json.as_str()), Some(e.checksum.as_str())),
            None => (None, None),
        };

        let conn = self.lock()?;
        let id: i64 = conn.query_row(
            "INSERT INTO file_record (session_id, path, size, mtime_ns, family, status, \
             fingerprint, checksum, error_kind, error_detail, present) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1) \
             ON CONFLICT(session_id, path) DO UPDATE SET \
                 size = excluded.size, \
                 mtime_ns = excluded.mtime_ns, \
                 family = excluded.family, \
                 status = excluded.status, \
                 fingerprint = excluded.fingerprint, \
                 checksum = excluded.checksum, \
                 error_kind = excluded.error_kind, \
                 error_detail = excluded.error_detail \
             RETURNING id",
            params![
                session.0,
                path,
                size_value(identity.size),
                identity.mtime_ns,
                family.as_str(),
                status.as_str(),
                json,
                checksum,
                error_kind,
                error_detail
            ],
            |row| row.get(0),
        )?;
        Ok(RecordId(id))
    }

    /// Record of `identity` in `session`, if the stored size and mtime
    /// still match.
    pub fn get(&self, session: SessionId, identity: &FileIdentity) -> StoreResult<Option<FileRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM file_record \
                     WHERE session_id = ?1 AND path = ?2 AND size = ?3 AND mtime_ns = ?4"
                ),
                params![
                    session.0,
                    path_text(&identity.path),
                    size_value(identity.size),
                    identity.mtime_ns
                ],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    /// Record by id.
    pub fn record(&self, id: RecordId) -> StoreResult<Option<FileRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM file_record WHERE id = ?1"),
                params![id.0],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    /// Restartable lazy sequence of a family's records.
    #[must_use]
    pub fn list_by_family(&self, session: SessionId, family: ContentFamily) -> FamilySnapshot<'_> {
        FamilySnapshot::new(self, session, family)
    }

    /// Failed records of a session, ordered by path.
    pub fn failed_records(&self, session: SessionId) -> StoreResult<Vec<FileRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_record \
             WHERE session_id = ?1 AND status = 'failed' ORDER BY path"
        ))?;
        let rows = stmt
            .query_map(params![session.0], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::decode).collect()
    }

    /// Return records stranded in `InProgress` by an interrupted run to
    /// `Pending`.
    pub fn reset_in_progress(&self, session: SessionId) -> StoreResult<usize> {
        let conn = self.lock()?;
        let reset = conn.execute(
            "UPDATE file_record SET status = 'pending' \
             WHERE session_id = ?1 AND status = 'in_progress'",
            params![session.0],
        )?;
        if reset > 0 {
            log::info!("Session {session}: {reset} interrupted extractions will be retried");
        }
        Ok(reset)
    }

    /// Prepare a finished session for another pass over its roots.
    ///
    /// Every record is marked absent until enumeration sees it again and
    /// stored groups are dropped. Timed-out and unreadable records become
    /// pending again; with `force`, every record does.
    pub fn reset_for_rescan(&self, session: SessionId, force: bool) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE file_record SET present = 0 WHERE session_id = ?1",
            params![session.0],
        )?;
        let retried = if force {
            tx.execute(
                "UPDATE file_record SET status = 'pending', fingerprint = NULL, checksum = NULL, \
                 error_kind = NULL, error_detail = NULL WHERE session_id = ?1",
                params![session.0],
            )?
        } else {
            tx.execute(
                "UPDATE file_record SET status = 'pending', error_kind = NULL, error_detail = NULL \
                 WHERE session_id = ?1 AND (status = 'in_progress' \
                    OR (status = 'failed' AND error_kind IN (?2, ?3)))",
                params![
                    session.0,
                    ErrorKind::Timeout.as_str(),
                    ErrorKind::Unreadable.as_str()
                ],
            )?
        };
        tx.execute(
            "DELETE FROM duplicate_group WHERE session_id = ?1",
            params![session.0],
        )?;
        tx.execute(
            "DELETE FROM family_grouping WHERE session_id = ?1",
            params![session.0],
        )?;
        tx.execute(
            "UPDATE scan_session SET enumerated = 0, error = NULL, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), session.0],
        )?;
        tx.commit()?;
        log::debug!("Session {session} reset for rescan, {retried} records will be retried");
        Ok(())
    }

    /// Per-family status counts of present records, in family order.
    pub fn family_counts(&self, session: SessionId) -> StoreResult<Vec<FamilyProgress>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT family, status, COUNT(*) FROM file_record \
             WHERE session_id = ?1 AND present = 1 GROUP BY family, status",
        )?;
        let rows = stmt
            .query_map(params![session.0], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts: Vec<FamilyProgress> = Vec::new();
        for (family, status, count) in rows {
            let family = family
                .parse::<ContentFamily>()
                .map_err(|_| StoreError::Corrupt(format!("unknown family '{family}'")))?;
            let status = RecordStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{status}'")))?;
            let entry = match counts.iter_mut().position(|c| c.family == Some(family)) {
                Some(index) => &mut counts[index],
                None => {
                    counts.push(FamilyProgress {
                        family: Some(family),
                        ..FamilyProgress::default()
                    });
                    let last = counts.len() - 1;
                    &mut counts[last]
                }
            };
            let count = u64::try_from(count).unwrap_or(0);
            match status {
                RecordStatus::Pending => entry.pending = count,
                RecordStatus::InProgress => entry.in_progress = count,
                RecordStatus::Done => entry.done = count,
                RecordStatus::Failed => entry.failed = count,
            }
        }
        counts.sort_by_key(|c| c.family);
        Ok(counts)
    }

    /// Failed present records per error kind.
    pub fn error_counts(&self, session: SessionId) -> StoreResult<Vec<(ErrorKind, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT error_kind, COUNT(*) FROM file_record \
             WHERE session_id = ?1 AND present = 1 AND status = 'failed' GROUP BY error_kind",
        )?;
        let rows = stmt
            .query_map(params![session.0], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(kind, count)| {
                let kind = kind
                    .as_deref()
                    .and_then(ErrorKind::parse)
                    .ok_or_else(|| StoreError::Corrupt("failed record without error kind".into()))?;
                Ok((kind, u64::try_from(count).unwrap_or(0)))
            })
            .collect()
    }

    /// Mark a record absent, e.g. after its file was deleted.
    pub fn mark_absent(&self, id: RecordId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("UPDATE file_record SET present = 0 WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    /// Drop every finished session and all cached fingerprints.
    ///
    /// Sessions that are not terminal are left alone. Returns the number of
    /// sessions removed.
    pub fn clear_cache(&self) -> StoreResult<usize> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM scan_session WHERE status IN ('completed', 'cancelled', 'failed')",
            [],
        )?;
        conn.execute_batch("VACUUM;")?;
        log::info!("Cleared {removed} finished sessions from the cache");
        Ok(removed)
    }
}

/// Row as read from `scan_session`, before validation.
struct RawSession {
    id: i64,
    roots: String,
    families: String,
    threshold: f64,
    status: String,
    enumerated: bool,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawSession {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            roots: row.get(1)?,
            families: row.get(2)?,
            threshold: row.get(3)?,
            status: row.get(4)?,
            enumerated: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn decode(self) -> StoreResult<ScanSession> {
        let corrupt = |what: String| StoreError::Corrupt(format!("session {}: {what}", self.id));
        let roots: Vec<RootPath> =
            serde_json::from_str(&self.roots).map_err(|e| corrupt(format!("bad roots: {e}")))?;
        let families: Vec<ContentFamily> = serde_json::from_str(&self.families)
            .map_err(|e| corrupt(format!("bad families: {e}")))?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        Ok(ScanSession {
            id: SessionId(self.id),
            roots,
            families,
            threshold: self.threshold,
            status,
            enumerated: self.enumerated,
            error: self.error,
            created_at: timestamp(&self.created_at)?,
            updated_at: timestamp(&self.updated_at)?,
        })
    }
}
