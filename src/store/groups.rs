//! Persistence of duplicate groups.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{FingerprintStore, RecordId, StoreError, StoreResult};
use crate::duplicates::{DuplicateGroup, GroupId, GroupMember};
use crate::scanner::ContentFamily;
use crate::session::SessionId;

const MEMBER_QUERY: &str = "SELECT m.group_id, m.record_id, r.path, r.size, r.mtime_ns, \
     m.score, m.link_score FROM duplicate_group_member m \
     JOIN file_record r ON r.id = m.record_id";

type MemberRow = (i64, i64, String, i64, i64, f64, f64);

fn member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn member(row: MemberRow) -> StoreResult<GroupMember> {
    let (_, record, path, size, mtime_ns, score, link_score) = row;
    let size = u64::try_from(size)
        .map_err(|_| StoreError::Corrupt(format!("record {record}: negative size")))?;
    Ok(GroupMember {
        record: RecordId(record),
        path: path.into(),
        size,
        mtime_ns,
        score,
        link_score,
    })
}

impl FingerprintStore {
    /// Replace the stored groups of one family, assigning group ids.
    pub fn replace_groups(
        &self,
        session: SessionId,
        family: ContentFamily,
        threshold: f64,
        groups: &mut [DuplicateGroup],
    ) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM duplicate_group WHERE session_id = ?1 AND family = ?2",
            params![session.0, family.as_str()],
        )?;
        {
            let mut insert_group = tx.prepare_cached(
                "INSERT INTO duplicate_group (session_id, family, position) VALUES (?1, ?2, ?3)",
            )?;
            let mut insert_member = tx.prepare_cached(
                "INSERT INTO duplicate_group_member (group_id, record_id, score, link_score, position) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, group) in groups.iter_mut().enumerate() {
                insert_group.execute(params![session.0, family.as_str(), position as i64])?;
                let id = tx.last_insert_rowid();
                for (index, m) in group.members.iter().enumerate() {
                    insert_member.execute(params![id, m.record.0, m.score, m.link_score, index as i64])?;
                }
                group.id = Some(GroupId(id));
            }
        }
        tx.execute(
            "INSERT INTO family_grouping (session_id, family, threshold, grouped_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(session_id, family) DO UPDATE SET \
                 threshold = excluded.threshold, grouped_at = excluded.grouped_at",
            params![session.0, family.as_str(), threshold, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        log::debug!(
            "Stored {} {} groups for session {}",
            groups.len(),
            family,
            session
        );
        Ok(())
    }

    /// Stored groups of one family, `None` if the family was never grouped
    /// since the last rescan.
    pub fn load_groups(
        &self,
        session: SessionId,
        family: ContentFamily,
    ) -> StoreResult<Option<Vec<DuplicateGroup>>> {
        let conn = self.lock()?;
        let grouped = conn
            .query_row(
                "SELECT 1 FROM family_grouping WHERE session_id = ?1 AND family = ?2",
                params![session.0, family.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        if grouped.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "{MEMBER_QUERY} JOIN duplicate_group g ON g.id = m.group_id \
             WHERE g.session_id = ?1 AND g.family = ?2 ORDER BY g.position, m.position"
        ))?;
        let rows = stmt
            .query_map(params![session.0, family.as_str()], member_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let id = GroupId(row.0);
            let m = member(row)?;
            match groups.last_mut() {
                Some(group) if group.id == Some(id) => group.members.push(m),
                _ => groups.push(DuplicateGroup {
                    id: Some(id),
                    family,
                    members: vec![m],
                }),
            }
        }
        Ok(Some(groups))
    }

    /// One group with its owning session.
    pub fn group(&self, id: GroupId) -> StoreResult<Option<(SessionId, DuplicateGroup)>> {
        let conn = self.lock()?;
        let header: Option<(i64, String)> = conn
            .query_row(
                "SELECT session_id, family FROM duplicate_group WHERE id = ?1",
                params![id.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((session, family)) = header else {
            return Ok(None);
        };
        let family = family
            .parse::<ContentFamily>()
            .map_err(|_| StoreError::Corrupt(format!("group {id}: unknown family '{family}'")))?;

        let mut stmt = conn.prepare(&format!(
            "{MEMBER_QUERY} WHERE m.group_id = ?1 ORDER BY m.position"
        ))?;
        let members = stmt
            .query_map(params![id.0], member_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(member)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Some((
            SessionId(session),
            DuplicateGroup {
                id: Some(id),
                family,
                members,
            },
        )))
    }

    /// Remove one member from a group. A group left with fewer than two
    /// members is deleted. Returns whether the group still exists.
    pub fn remove_member(&self, group: GroupId, record: RecordId) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM duplicate_group_member WHERE group_id = ?1 AND record_id = ?2",
            params![group.0, record.0],
        )?;
        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM duplicate_group_member WHERE group_id = ?1",
            params![group.0],
            |row| row.get(0),
        )?;
        let alive = remaining >= 2;
        if !alive {
            tx.execute("DELETE FROM duplicate_group WHERE id = ?1", params![group.0])?;
        }
        tx.commit()?;
        Ok(alive)
    }

    /// Forget every stored grouping of a session.
    pub fn clear_groups(&self, session: SessionId) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM duplicate_group WHERE session_id = ?1",
            params![session.0],
        )?;
        conn.execute(
            "DELETE FROM family_grouping WHERE session_id = ?1",
            params![session.0],
        )?;
        Ok(())
    }
}
