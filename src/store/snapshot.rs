//! Lazy, restartable iteration over one family's records.

use rusqlite::params;

use super::record::{RawRecord, RECORD_COLUMNS};
use super::{FileRecord, FingerprintStore, StoreError};
use crate::scanner::ContentFamily;
use crate::session::SessionId;

/// Records fetched per query.
pub const PAGE_SIZE: usize = 512;

/// A family's records, read page by page in record id order.
///
/// Each call to `into_iter` starts a fresh pass bounded by the highest
/// record id present at that moment, so every pass is finite even while
/// enumeration keeps inserting.
#[derive(Debug, Clone, Copy)]
pub struct FamilySnapshot<'a> {
    store: &'a FingerprintStore,
    session: SessionId,
    family: ContentFamily,
    page_size: usize,
}

impl<'a> FamilySnapshot<'a> {
    pub(crate) fn new(store: &'a FingerprintStore, session: SessionId, family: ContentFamily) -> Self {
        Self {
            store,
            session,
            family,
            page_size: PAGE_SIZE,
        }
    }

    /// Use a different page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Start a new pass.
    #[must_use]
    pub fn iter(&self) -> SnapshotIter<'a> {
        SnapshotIter {
            snapshot: *self,
            upper: None,
            after: 0,
            page: Vec::new().into_iter(),
            finished: false,
        }
    }

    /// Collect one full pass.
    pub fn collect_records(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &FamilySnapshot<'a> {
    type Item = Result<FileRecord, StoreError>;
    type IntoIter = SnapshotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for FamilySnapshot<'a> {
    type Item = Result<FileRecord, StoreError>;
    type IntoIter = SnapshotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`FamilySnapshot`].
pub struct SnapshotIter<'a> {
    snapshot: FamilySnapshot<'a>,
    upper: Option<i64>,
    after: i64,
    page: std::vec::IntoIter<RawRecord>,
    finished: bool,
}

impl SnapshotIter<'_> {
    fn fetch(&mut self) -> Result<(), StoreError> {
        let s = self.snapshot;
        let conn = s.store.lock()?;
        let upper = match self.upper {
            Some(upper) => upper,
            None => {
                let upper: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(id), 0) FROM file_record WHERE session_id = ?1",
                    params![s.session.0],
                    |row| row.get(0),
                )?;
                self.upper = Some(upper);
                upper
            }
        };
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM file_record \
             WHERE session_id = ?1 AND family = ?2 AND id > ?3 AND id <= ?4 \
             ORDER BY id LIMIT ?5"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    s.session.0,
                    s.family.as_str(),
                    self.after,
                    upper,
                    i64::try_from(s.page_size).unwrap_or(i64::MAX)
                ],
                RawRecord::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.len() < s.page_size {
            self.finished = true;
        }
        if let Some(last) = rows.last() {
            self.after = last.id;
        }
        self.page = rows.into_iter();
        Ok(())
    }
}

impl Iterator for SnapshotIter<'_> {
    type Item = Result<FileRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(raw) = self.page.next() {
                return Some(raw.decode());
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.fetch() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}
