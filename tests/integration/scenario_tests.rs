use super::support::{engine, fake_extractors, noise_image, paragraph, scan};
use neardupe::duplicates::{Grouper, GrouperConfig};
use neardupe::fingerprint::{BitVector, ErrorKind, ExtractorSet, ExtractorSettings, Fingerprint};
use neardupe::scanner::{ContentFamily, FileIdentity};
use neardupe::session::SessionId;
use neardupe::store::{FileRecord, RecordId, RecordStatus};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

fn image_record(id: i64, name: &str, hash: BitVector) -> FileRecord {
    FileRecord {
        id: RecordId(id),
        session: SessionId(1),
        identity: FileIdentity::new(format!("/photos/{name}"), 1000, 0),
        family: ContentFamily::Image,
        status: RecordStatus::Done,
        fingerprint: Some(Fingerprint::Image(hash)),
        error: None,
        present: true,
    }
}

#[test]
fn test_identical_jpegs_form_one_group() {
    let dir = tempdir().unwrap();
    noise_image(1).save(dir.path().join("beach.jpg")).unwrap();
    fs::copy(dir.path().join("beach.jpg"), dir.path().join("beach-copy.jpg")).unwrap();
    noise_image(2).save(dir.path().join("forest.jpg")).unwrap();

    let engine = engine(ExtractorSet::default());
    let id = scan(&engine, dir.path(), &[ContentFamily::Image], 0.95);
    let groups = engine.get_groups(id, ContentFamily::Image).unwrap();

    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.len(), 2);
    assert!(group.members.iter().all(|m| m.score == 1.0));
    assert!(group.contains_path(&dir.path().join("beach.jpg")));
    assert!(group.contains_path(&dir.path().join("beach-copy.jpg")));
    assert!(!group.contains_path(&dir.path().join("forest.jpg")));
}

#[test]
fn test_threshold_decides_near_match() {
    // 100-bit hashes four bits apart: 96% similar
    let original = BitVector::new(vec![0xA5; 13], 100).unwrap();
    let mut cropped_bytes = original.as_bytes().to_vec();
    cropped_bytes[0] ^= 0b1111_0000;
    let cropped = BitVector::new(cropped_bytes, 100).unwrap();
    assert_eq!(original.hamming(&cropped), Some(4));

    let records = vec![
        image_record(1, "original.jpg", original),
        image_record(2, "cropped.jpg", cropped),
    ];

    let loose = Grouper::new(GrouperConfig::default().with_threshold(0.95))
        .group(ContentFamily::Image, records.clone());
    assert_eq!(loose.len(), 1);
    assert!((loose[0].members[1].score - 0.96).abs() < 1e-9);

    let strict = Grouper::new(GrouperConfig::default().with_threshold(0.97))
        .group(ContentFamily::Image, records);
    assert!(strict.is_empty());
}

#[test]
fn test_renamed_zip_is_grouped() {
    let dir = tempdir().unwrap();
    let entries: &[(&str, &[u8])] = &[("notes/a.txt", b"alpha"), ("notes/b.txt", b"beta")];
    write_zip(&dir.path().join("project.zip"), entries);
    fs::copy(dir.path().join("project.zip"), dir.path().join("backup-2021.zip")).unwrap();
    write_zip(&dir.path().join("other.zip"), &[("c.txt", b"gamma")]);

    let engine = engine(ExtractorSet::default());
    let id = scan(&engine, dir.path(), &[ContentFamily::Archive], 0.95);
    let groups = engine.get_groups(id, ContentFamily::Archive).unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert!(groups[0].contains_path(&dir.path().join("backup-2021.zip")));
    assert!(!groups[0].contains_path(&dir.path().join("other.zip")));
}

#[test]
fn test_trimmed_video_is_grouped_after_alignment() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("holiday.mp4"), "0 100 500").unwrap();
    // same footage without its first ten seconds
    fs::write(dir.path().join("holiday-trimmed.mkv"), "10 90 500").unwrap();
    fs::write(dir.path().join("unrelated.mp4"), "0 100 900").unwrap();

    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Video], 0.9);
    let groups = engine.get_groups(id, ContentFamily::Video).unwrap();

    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.len(), 2);
    assert!(group.contains_path(&dir.path().join("holiday.mp4")));
    assert!(group.contains_path(&dir.path().join("holiday-trimmed.mkv")));
    assert!(group.min_score() >= 0.9);
}

#[test]
fn test_unreadable_document_does_not_abort_the_session() {
    let dir = tempdir().unwrap();
    let body = paragraph(1, 60);
    fs::write(dir.path().join("a.txt"), &body).unwrap();
    fs::write(dir.path().join("b.txt"), &body).unwrap();
    fs::write(dir.path().join("locked.txt"), &body).unwrap();

    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Document], 0.9);

    let progress = engine.get_progress(id).unwrap();
    assert_eq!(progress.discovered, 3);
    assert_eq!(progress.processed, 3);
    assert_eq!(progress.errored, 1);
    assert_eq!(progress.unreadable, 1);

    let failed = engine.failed_records(id).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error.as_ref().unwrap().kind, ErrorKind::Unreadable);

    let groups = engine.get_groups(id, ContentFamily::Document).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert!(!groups[0].contains_path(&dir.path().join("locked.txt")));
}

#[cfg(unix)]
#[test]
fn test_permission_denied_image_is_recorded() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    noise_image(7).save(dir.path().join("a.png")).unwrap();
    fs::copy(dir.path().join("a.png"), dir.path().join("b.png")).unwrap();
    let locked = dir.path().join("c.png");
    fs::copy(dir.path().join("a.png"), &locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // permissions are not enforced for this user (root)
        return;
    }

    let engine = engine(ExtractorSet::default());
    let id = scan(&engine, dir.path(), &[ContentFamily::Image], 0.95);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

    let progress = engine.get_progress(id).unwrap();
    assert_eq!(progress.processed, 3);
    assert_eq!(progress.unreadable, 1);
    let groups = engine.get_groups(id, ContentFamily::Image).unwrap();
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].contains_path(&locked));
}
