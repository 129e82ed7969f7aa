use super::support::{engine, fake_extractors, paragraph, scan};
use neardupe::error::ExitCode;
use neardupe::fingerprint::ExtractorSettings;
use neardupe::output::{CsvOutput, JsonOutput};
use neardupe::scanner::ContentFamily;
use neardupe::session::{ScanEngine, SessionId};
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn scanned() -> (TempDir, Arc<ScanEngine>, SessionId) {
    let dir = tempdir().unwrap();
    let body = paragraph(4, 30);
    fs::write(dir.path().join("one.txt"), &body).unwrap();
    fs::write(dir.path().join("two.txt"), &body).unwrap();
    fs::write(dir.path().join("locked.txt"), &body).unwrap();
    fs::write(dir.path().join("other.txt"), paragraph(5, 30)).unwrap();
    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Document], 0.9);
    (dir, engine, id)
}

#[test]
fn test_json_report_of_a_finished_session() {
    let (dir, engine, id) = scanned();
    let session = engine.session(id).unwrap();
    let progress = engine.get_progress(id).unwrap();
    let groups = engine.get_groups(id, ContentFamily::Document).unwrap();

    let report = JsonOutput::new(&session, &progress, &groups, ExitCode::PartialSuccess);
    let mut buffer = Vec::new();
    report.write_to(&mut buffer, true).unwrap();
    let json: Value = serde_json::from_slice(&buffer).unwrap();

    assert_eq!(json["session"]["status"], "completed");
    assert_eq!(json["progress"]["discovered"], 4);
    assert_eq!(json["progress"]["errored"], 1);

    let group = &json["groups"][0];
    assert_eq!(group["family"], "document");
    assert_eq!(group["id"], groups[0].id.unwrap().0);
    let members = group["members"].as_array().unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0]["similarity"], 1.0);
    let size = fs::metadata(dir.path().join("one.txt")).unwrap().len();
    assert_eq!(group["wasted_space"], size);

    assert_eq!(json["summary"]["duplicate_groups"], 1);
    assert_eq!(json["summary"]["duplicate_files"], 1);
    assert_eq!(json["summary"]["failed_files"], 1);
    assert_eq!(json["summary"]["exit_code_name"], "ND003");
}

#[test]
fn test_csv_lists_every_member_with_its_group() {
    let (dir, engine, id) = scanned();
    let groups = engine.get_groups(id, ContentFamily::Document).unwrap();
    let csv = CsvOutput::new(&groups).to_string().unwrap();

    let mut reader = csv::Reader::from_reader(csv.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        ["group_id", "family", "similarity", "representative", "path", "size", "modified"]
    );

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 2);
    let group_id = groups[0].id.unwrap().0.to_string();
    for row in &rows {
        assert_eq!(&row[0], group_id.as_str());
        assert_eq!(&row[1], "document");
        assert_eq!(&row[2], "1.0000");
        assert!(!row[4].contains("locked") && !row[4].contains("other"));
    }
    let paths: Vec<&str> = rows.iter().map(|r| &r[4]).collect();
    assert!(paths.contains(&dir.path().join("one.txt").to_string_lossy().as_ref()));
    assert!(paths.contains(&dir.path().join("two.txt").to_string_lossy().as_ref()));
}
