use super::support::{engine, fake_extractors, paragraph, scan};
use neardupe::actions::{DeleteError, FileOperations, SystemFileOperations};
use neardupe::duplicates::GroupId;
use neardupe::fingerprint::ExtractorSettings;
use neardupe::scanner::ContentFamily;
use neardupe::session::{ScanEngine, SessionError, SessionId};
use neardupe::store::RecordId;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};

/// Records deletions instead of performing them; fails for listed paths.
#[derive(Default)]
struct RecordingOps {
    deleted: Mutex<Vec<PathBuf>>,
    refuse: Vec<PathBuf>,
}

impl FileOperations for RecordingOps {
    fn delete(&self, path: &Path) -> Result<(), DeleteError> {
        if self.refuse.iter().any(|p| p == path) {
            return Err(DeleteError::PermissionDenied(path.to_path_buf()));
        }
        self.deleted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

fn three_copies() -> (TempDir, std::sync::Arc<ScanEngine>, SessionId) {
    let dir = tempdir().unwrap();
    let body = paragraph(8, 50);
    for name in ["a.txt", "b.txt", "c.txt"] {
        fs::write(dir.path().join(name), &body).unwrap();
    }
    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Document], 0.9);
    (dir, engine, id)
}

#[test]
fn test_delete_members_removes_them_from_the_group() {
    let (dir, engine, id) = three_copies();
    let group = engine.get_groups(id, ContentFamily::Document).unwrap().remove(0);
    let group_id = group.id.unwrap();
    let victims: Vec<RecordId> = group.duplicates().iter().map(|m| m.record).collect();

    let ops = RecordingOps::default();
    let report = engine.delete_members(group_id, &victims, &ops).unwrap();

    assert!(report.all_succeeded());
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(ops.deleted.lock().unwrap().len(), 2);
    assert!(report.bytes_freed > 0);

    // the fake leaves files in place; the store no longer lists them
    assert!(dir.path().join("b.txt").exists());
    // a single survivor is no longer a group
    assert!(engine.get_groups(id, ContentFamily::Document).unwrap().is_empty());
}

#[test]
fn test_refuses_to_delete_every_copy() {
    let (_dir, engine, id) = three_copies();
    let group = engine.get_groups(id, ContentFamily::Document).unwrap().remove(0);
    let all: Vec<RecordId> = group.members.iter().map(|m| m.record).collect();

    let ops = RecordingOps::default();
    let err = engine.delete_members(group.id.unwrap(), &all, &ops).unwrap_err();
    assert!(matches!(
        err,
        SessionError::Delete(DeleteError::AllCopiesWouldBeDeleted)
    ));
    assert!(ops.deleted.lock().unwrap().is_empty());
}

#[test]
fn test_modified_file_is_skipped() {
    let (dir, engine, id) = three_copies();
    let group = engine.get_groups(id, ContentFamily::Document).unwrap().remove(0);
    let target = group.duplicates()[0].clone();
    fs::write(&target.path, "changed since the scan").unwrap();

    let ops = RecordingOps::default();
    let report = engine
        .delete_members(group.id.unwrap(), &[target.record], &ops)
        .unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(ops.deleted.lock().unwrap().is_empty());
    assert!(dir.path().join(target.path.file_name().unwrap()).exists());
}

#[test]
fn test_operation_failures_are_reported_per_member() {
    let (_dir, engine, id) = three_copies();
    let group = engine.get_groups(id, ContentFamily::Document).unwrap().remove(0);
    let dupes = group.duplicates();
    let ops = RecordingOps {
        refuse: vec![dupes[0].path.clone()],
        ..RecordingOps::default()
    };

    let ids = [dupes[0].record, dupes[1].record];
    let report = engine.delete_members(group.id.unwrap(), &ids, &ops).unwrap();
    assert_eq!(report.deleted, vec![dupes[1].record]);
    assert_eq!(report.failed.len(), 1);
    assert!(!report.all_succeeded());
}

#[test]
fn test_unknown_group_is_rejected() {
    let (_dir, engine, _id) = three_copies();
    let ops = RecordingOps::default();
    assert!(matches!(
        engine.delete_members(GroupId(9999), &[RecordId(1)], &ops),
        Err(SessionError::GroupNotFound(GroupId(9999)))
    ));
}

#[test]
fn test_permanent_delete_removes_the_file() {
    let (dir, engine, id) = three_copies();
    let group = engine.get_groups(id, ContentFamily::Document).unwrap().remove(0);
    let target = group.duplicates()[0].clone();

    let ops = SystemFileOperations::permanent();
    assert!(ops.is_permanent());
    let report = engine
        .delete_members(group.id.unwrap(), &[target.record], &ops)
        .unwrap();
    assert_eq!(report.deleted, vec![target.record]);
    assert!(!target.path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
}
