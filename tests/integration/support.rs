//! Fakes and fixtures shared by the integration tests.

use image::{DynamicImage, Rgb, RgbImage};
use neardupe::fingerprint::{
    Deadline, ExtractionError, ExtractorSet, ExtractorSettings, FrameSource, TextExtractor,
    VideoInfo,
};
use neardupe::scanner::{ContentFamily, RootPath};
use neardupe::session::{EngineSettings, ScanEngine, SessionId, SessionStatus};
use neardupe::store::FingerprintStore;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Reads documents as plain UTF-8. Files named `locked*` fail as
/// unreadable.
pub struct PlainText;

impl TextExtractor for PlainText {
    fn extract_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let locked = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with("locked"));
        if locked {
            return Err(ExtractionError::unreadable(path, "permission denied"));
        }
        fs::read_to_string(path).map_err(|e| ExtractionError::from_io(path, &e))
    }
}

/// Video files hold `"<offset> <duration> <seed>"`. Every 10 seconds of
/// source time is one scene; a scene renders as noise seeded by
/// `seed + scene`.
pub struct SceneFrames;

impl SceneFrames {
    fn header(path: &Path) -> Result<(f64, f64, u64), ExtractionError> {
        let raw = fs::read_to_string(path).map_err(|e| ExtractionError::from_io(path, &e))?;
        let mut parts = raw.split_whitespace();
        let mut next = || {
            parts
                .next()
                .ok_or_else(|| ExtractionError::unsupported(path, "short header"))
        };
        let offset = next()?.parse::<f64>().map_err(|e| ExtractionError::unsupported(path, e))?;
        let duration = next()?.parse::<f64>().map_err(|e| ExtractionError::unsupported(path, e))?;
        let seed = next()?.parse::<u64>().map_err(|e| ExtractionError::unsupported(path, e))?;
        Ok((offset, duration, seed))
    }
}

impl FrameSource for SceneFrames {
    fn probe(&self, path: &Path, _deadline: Deadline) -> Result<VideoInfo, ExtractionError> {
        let (_, duration, _) = Self::header(path)?;
        Ok(VideoInfo {
            duration_secs: Some(duration),
        })
    }

    fn frame_at(
        &self,
        path: &Path,
        at_secs: f64,
        _deadline: Deadline,
    ) -> Result<DynamicImage, ExtractionError> {
        let (offset, _, seed) = Self::header(path)?;
        let scene = ((offset + at_secs) / 10.0).floor() as u64;
        Ok(noise_image(seed + scene))
    }
}

/// A 64x64 image of 8x8 gray blocks drawn from a seeded LCG.
pub fn noise_image(seed: u64) -> DynamicImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut blocks = [0u8; 64];
    for block in &mut blocks {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *block = (state >> 56) as u8;
    }
    let img = RgbImage::from_fn(64, 64, |x, y| {
        let v = blocks[((y / 8) * 8 + x / 8) as usize];
        Rgb([v, v, v])
    });
    DynamicImage::ImageRgb8(img)
}

/// Engine over a private in-memory store.
pub fn engine(extractors: ExtractorSet) -> Arc<ScanEngine> {
    let store = Arc::new(FingerprintStore::open_in_memory().unwrap());
    let settings = EngineSettings {
        workers: 2,
        timeout: Duration::from_secs(20),
        ..EngineSettings::default()
    };
    Arc::new(ScanEngine::new(store, Arc::new(extractors), settings))
}

/// Default extractors with the plain-text and scene fakes.
pub fn fake_extractors(settings: &ExtractorSettings) -> ExtractorSet {
    ExtractorSet::new(settings)
        .with_text_extractor(Arc::new(PlainText))
        .with_frame_source(Arc::new(SceneFrames))
}

/// Create and start a session over `root`, then wait for it to finish.
pub fn scan(
    engine: &ScanEngine,
    root: &Path,
    families: &[ContentFamily],
    threshold: f64,
) -> SessionId {
    let id = engine
        .create_session(vec![RootPath::new(root, true)], families.to_vec(), threshold)
        .unwrap();
    engine.start(id).unwrap();
    assert_eq!(engine.wait(id).unwrap(), SessionStatus::Completed);
    id
}

/// A paragraph of distinct words, varied by `seed`.
pub fn paragraph(seed: usize, words: usize) -> String {
    (0..words)
        .map(|i| format!("w{}x{}", seed, i))
        .collect::<Vec<_>>()
        .join(" ")
}
