use super::support::{engine, fake_extractors, paragraph, scan, PlainText};
use neardupe::duplicates::DuplicateGroup;
use neardupe::fingerprint::{ExtractionError, ExtractorSet, ExtractorSettings, TextExtractor};
use neardupe::progress::{ProgressCallback, PHASE_PROCESSING};
use neardupe::scanner::{ContentFamily, RootPath};
use neardupe::session::{EngineSettings, ScanEngine, SessionError, SessionId, SessionStatus};
use neardupe::store::FingerprintStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::tempdir;

/// Pauses the session on the first processed file.
#[derive(Default)]
struct PauseEarly {
    target: OnceLock<(Arc<ScanEngine>, SessionId)>,
    processing: AtomicBool,
    fired: AtomicBool,
}

impl ProgressCallback for PauseEarly {
    fn on_phase_start(&self, phase: &str, _total: usize) {
        self.processing
            .store(phase == PHASE_PROCESSING, Ordering::SeqCst);
    }

    fn on_progress(&self, _current: usize, _path: &str) {
        if !self.processing.load(Ordering::SeqCst) || self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((engine, id)) = self.target.get() {
            engine.pause(*id).unwrap();
        }
    }

    fn on_phase_end(&self, _phase: &str) {}
}

/// Blocks every extraction until opened.
#[derive(Default)]
struct Gate {
    open: AtomicBool,
}

impl TextExtractor for Gate {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(10));
        }
        PlainText.extract_text(path)
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        workers: 1,
        timeout: Duration::from_secs(20),
        ..EngineSettings::default()
    }
}

fn corpus(dir: &Path) {
    for cluster in 0..6 {
        let body = paragraph(cluster, 50);
        for copy in 0..4 {
            fs::write(dir.join(format!("doc{cluster}-{copy}.txt")), &body).unwrap();
        }
    }
    fs::write(dir.join("solo.txt"), paragraph(99, 50)).unwrap();
}

/// Groups reduced to what survives a change of store: paths and scores.
fn shape(groups: &[DuplicateGroup]) -> Vec<Vec<(PathBuf, String)>> {
    let mut shape: Vec<Vec<(PathBuf, String)>> = groups
        .iter()
        .map(|g| {
            g.members
                .iter()
                .map(|m| (m.path.clone(), format!("{:.6}", m.score)))
                .collect()
        })
        .collect();
    shape.sort();
    shape
}

#[test]
fn test_pause_and_resume_match_uninterrupted_run() {
    let dir = tempdir().unwrap();
    corpus(dir.path());

    let reference = engine(fake_extractors(&ExtractorSettings::default()));
    let ref_id = scan(&reference, dir.path(), &[ContentFamily::Document], 0.9);
    let expected = shape(&reference.get_groups(ref_id, ContentFamily::Document).unwrap());
    assert_eq!(expected.len(), 6);

    let pauser = Arc::new(PauseEarly::default());
    let store = Arc::new(FingerprintStore::open_in_memory().unwrap());
    let engine = Arc::new(
        ScanEngine::new(
            store,
            Arc::new(fake_extractors(&ExtractorSettings::default())),
            settings(),
        )
        .with_progress(pauser.clone()),
    );
    let id = engine
        .create_session(
            vec![RootPath::new(dir.path(), true)],
            vec![ContentFamily::Document],
            0.9,
        )
        .unwrap();
    let _ = pauser.target.set((Arc::clone(&engine), id));
    engine.start(id).unwrap();

    let mut status = engine.wait(id).unwrap();
    let mut resumes = 0;
    while status == SessionStatus::Paused {
        assert!(resumes < 5, "session never completed");
        engine.resume(id).unwrap();
        status = engine.wait(id).unwrap();
        resumes += 1;
    }
    assert_eq!(status, SessionStatus::Completed);

    let groups = engine.get_groups(id, ContentFamily::Document).unwrap();
    assert_eq!(shape(&groups), expected);
    let progress = engine.get_progress(id).unwrap();
    assert_eq!(progress.processed, progress.discovered);
}

#[test]
fn test_paused_session_resumes_in_a_new_engine() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    fs::create_dir(&data).unwrap();
    corpus(&data);
    let db = dir.path().join("store.db");

    let pauser = Arc::new(PauseEarly::default());
    let first = Arc::new(
        ScanEngine::new(
            Arc::new(FingerprintStore::open(&db).unwrap()),
            Arc::new(fake_extractors(&ExtractorSettings::default())),
            settings(),
        )
        .with_progress(pauser.clone()),
    );
    let id = first
        .create_session(vec![RootPath::new(&data, true)], vec![ContentFamily::Document], 0.9)
        .unwrap();
    let _ = pauser.target.set((Arc::clone(&first), id));
    first.start(id).unwrap();
    let status = first.wait(id).unwrap();
    drop(pauser);
    drop(first);

    let second = ScanEngine::new(
        Arc::new(FingerprintStore::open(&db).unwrap()),
        Arc::new(fake_extractors(&ExtractorSettings::default())),
        settings(),
    );
    if status == SessionStatus::Paused {
        second.resume(id).unwrap();
        assert_eq!(second.wait(id).unwrap(), SessionStatus::Completed);
    }
    let groups = second.get_groups(id, ContentFamily::Document).unwrap();
    assert_eq!(groups.len(), 6);
    assert!(groups.iter().all(|g| g.len() == 4));
}

#[test]
fn test_groups_are_not_ready_while_extracting() {
    let dir = tempdir().unwrap();
    corpus(dir.path());
    let gate = Arc::new(Gate::default());
    let engine = engine(ExtractorSet::default().with_text_extractor(gate.clone()));

    let id = engine
        .create_session(
            vec![RootPath::new(dir.path(), true)],
            vec![ContentFamily::Document],
            0.9,
        )
        .unwrap();
    assert!(matches!(
        engine.get_groups(id, ContentFamily::Document),
        Err(SessionError::NotReady { .. })
    ));

    engine.start(id).unwrap();
    assert!(matches!(
        engine.get_groups(id, ContentFamily::Document),
        Err(SessionError::NotReady { .. })
    ));
    assert!(engine.preview_groups(id, ContentFamily::Document).is_ok());
    // families outside the session are empty, not pending
    assert!(engine.get_groups(id, ContentFamily::Image).unwrap().is_empty());

    gate.open.store(true, Ordering::SeqCst);
    assert_eq!(engine.wait(id).unwrap(), SessionStatus::Completed);
    assert_eq!(engine.get_groups(id, ContentFamily::Document).unwrap().len(), 6);
}

#[test]
fn test_families_never_share_a_group() {
    let dir = tempdir().unwrap();
    let words = paragraph(3, 40);
    fs::write(dir.path().join("essay.txt"), &words).unwrap();
    fs::write(dir.path().join("essay-copy.txt"), &words).unwrap();
    // identical tokens, different family
    fs::write(dir.path().join("essay.py"), &words).unwrap();
    fs::write(dir.path().join("essay_copy.py"), &words).unwrap();

    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(
        &engine,
        dir.path(),
        &[ContentFamily::Document, ContentFamily::Code],
        0.9,
    );

    for (family, extension) in [(ContentFamily::Document, "txt"), (ContentFamily::Code, "py")] {
        let groups = engine.get_groups(id, family).unwrap();
        assert_eq!(groups.len(), 1, "{family}");
        for member in &groups[0].members {
            assert_eq!(member.path.extension().unwrap(), extension);
        }
    }
}

#[test]
fn test_cancelled_session_cannot_resume() {
    let dir = tempdir().unwrap();
    corpus(dir.path());
    let gate = Arc::new(Gate::default());
    let engine = engine(ExtractorSet::default().with_text_extractor(gate.clone()));
    let id = engine
        .create_session(
            vec![RootPath::new(dir.path(), true)],
            vec![ContentFamily::Document],
            0.9,
        )
        .unwrap();
    engine.start(id).unwrap();
    engine.cancel(id).unwrap();
    gate.open.store(true, Ordering::SeqCst);

    assert_eq!(engine.wait(id).unwrap(), SessionStatus::Cancelled);
    assert!(matches!(
        engine.resume(id),
        Err(SessionError::InvalidTransition { .. })
    ));
    // cancelling again is harmless
    engine.cancel(id).unwrap();
}

#[test]
fn test_rescan_sees_modified_files() {
    let dir = tempdir().unwrap();
    let body = paragraph(5, 40);
    fs::write(dir.path().join("a.txt"), &body).unwrap();
    fs::write(dir.path().join("b.txt"), &body).unwrap();
    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Document], 0.9);
    assert_eq!(engine.get_groups(id, ContentFamily::Document).unwrap().len(), 1);

    let b = dir.path().join("b.txt");
    fs::write(&b, paragraph(6, 40)).unwrap();
    filetime::set_file_mtime(&b, filetime::FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

    engine.rescan(id, false).unwrap();
    assert_eq!(engine.wait(id).unwrap(), SessionStatus::Completed);
    assert!(engine.get_groups(id, ContentFamily::Document).unwrap().is_empty());
}

#[test]
fn test_resume_sees_files_changed_while_paused() {
    let dir = tempdir().unwrap();
    let body = paragraph(7, 40);
    fs::write(dir.path().join("a.txt"), &body).unwrap();
    fs::write(dir.path().join("b.txt"), &body).unwrap();
    let engine = engine(fake_extractors(&ExtractorSettings::default()));
    let id = scan(&engine, dir.path(), &[ContentFamily::Document], 0.9);
    assert_eq!(engine.get_groups(id, ContentFamily::Document).unwrap().len(), 1);

    // as if paused after enumeration finished
    engine
        .store()
        .update_status(id, SessionStatus::Paused, None)
        .unwrap();
    let b = dir.path().join("b.txt");
    fs::write(&b, paragraph(8, 40)).unwrap();
    filetime::set_file_mtime(&b, filetime::FileTime::from_unix_time(1_000_000_000, 0)).unwrap();
    fs::write(dir.path().join("c.txt"), &body).unwrap();

    engine.resume(id).unwrap();
    assert_eq!(engine.wait(id).unwrap(), SessionStatus::Completed);
    assert_eq!(engine.get_progress(id).unwrap().discovered, 3);

    let groups = engine.get_groups(id, ContentFamily::Document).unwrap();
    assert_eq!(groups.len(), 1);
    let names: Vec<_> = groups[0]
        .members
        .iter()
        .map(|m| m.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"c.txt".to_string()));
}

#[test]
fn test_unknown_session_is_reported() {
    let engine = engine(ExtractorSet::default());
    assert!(matches!(
        engine.get_progress(SessionId(404)),
        Err(SessionError::NotFound(SessionId(404)))
    ));
    assert!(matches!(
        engine.resume(SessionId(404)),
        Err(SessionError::NotFound(_))
    ));
}
