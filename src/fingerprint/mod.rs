//! Content-type-specific fingerprints and their extractors.
//!
//! # Overview
//!
//! A [`Fingerprint`] is a typed summary of a file's content, tagged by
//! [`ContentFamily`]. Two files are compared only through their
//! fingerprints, never through their bytes.
//!
//! | Family   | Payload                                             |
//! |----------|-----------------------------------------------------|
//! | Image    | perceptual hash ([`BitVector`]), or aHash/pHash/dHash |
//! | Video    | ordered per-frame perceptual hashes                 |
//! | Document | normalized text + 64-bit shingle hashes             |
//! | Code     | comment-free token stream + 64-bit shingle hashes   |
//! | Archive  | BLAKE3 hash over sorted entries                     |
//!
//! [`ExtractorSet`] dispatches a path to the extractor for its family.
//! Extraction is deterministic for unchanged bytes and never writes to the
//! source file.

pub mod archive;
pub mod code;
pub mod document;
pub mod perceptual;
pub mod shingle;
pub mod video;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::scanner::ContentFamily;

pub use archive::archive_hash;
pub use code::CodeNormalizer;
pub use document::{DocumentExtractor, TextExtractor};
pub use perceptual::{PerceptualAlgorithm, PerceptualHasher};
pub use video::{FfmpegFrameSource, FrameSampling, FrameSource, VideoInfo};

/// A fixed-length bit vector, as produced by a perceptual hash.
///
/// Bits are packed most-significant first. Trailing bits in the last byte
/// beyond `bits` are always zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitVector {
    bits: usize,
    bytes: Vec<u8>,
}

impl BitVector {
    /// Create a bit vector of `bits` length from packed bytes.
    ///
    /// Returns `None` when `bytes` is too short to hold `bits`.
    #[must_use]
    pub fn new(mut bytes: Vec<u8>, bits: usize) -> Option<Self> {
        let needed = bits.div_ceil(8);
        if bytes.len() < needed {
            return None;
        }
        bytes.truncate(needed);
        let spare = needed * 8 - bits;
        if spare > 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
        Some(Self { bits, bytes })
    }

    /// Use every bit of `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let bits = bytes.len() * 8;
        Self { bits, bytes }
    }

    /// Number of bits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bits
    }

    /// Whether the vector holds no bits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Packed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Value of bit `index` (most-significant first).
    #[must_use]
    pub fn bit(&self, index: usize) -> bool {
        index < self.bits && self.bytes[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Hamming distance, or `None` when the lengths differ.
    #[must_use]
    pub fn hamming(&self, other: &Self) -> Option<u32> {
        if self.bits != other.bits {
            return None;
        }
        Some(
            self.bytes
                .iter()
                .zip(&other.bytes)
                .map(|(a, b)| (a ^ b).count_ones())
                .sum(),
        )
    }

    /// Exact-match key for band `band` out of `bands` equal-width bands.
    ///
    /// The last band absorbs the remainder when `bits` is not a multiple of
    /// `bands`.
    #[must_use]
    pub fn band_key(&self, band: usize, bands: usize) -> Vec<u8> {
        let bands = bands.clamp(1, self.bits.max(1));
        let width = self.bits / bands;
        let start = band * width;
        let end = if band + 1 == bands { self.bits } else { start + width };
        let mut key = vec![0u8; (end.saturating_sub(start)).div_ceil(8)];
        for (offset, index) in (start..end).enumerate() {
            if self.bit(index) {
                key[offset / 8] |= 0x80 >> (offset % 8);
            }
        }
        key
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Shingled text, shared by documents and code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFingerprint {
    /// Normalized text the shingles were computed from
    pub text: String,
    /// Sorted, de-duplicated 64-bit shingle hashes
    pub shingles: Vec<u64>,
}

/// Per-frame hashes of a sampled video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFingerprint {
    /// Perceptual hash of each sampled frame, in timeline order
    pub frames: Vec<BitVector>,
    /// Number of frames the sampler asked for
    pub frame_count: usize,
    /// Container-reported duration, when known
    pub duration_secs: Option<f64>,
}

/// aHash, pHash and dHash of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHashes {
    /// Mean-based hash
    pub ahash: BitVector,
    /// DCT-based hash
    pub phash: BitVector,
    /// Gradient-based hash
    pub dhash: BitVector,
}

impl ImageHashes {
    /// The three hashes, aHash first.
    pub fn iter(&self) -> impl Iterator<Item = &BitVector> {
        [&self.ahash, &self.phash, &self.dhash].into_iter()
    }
}

/// A typed fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "data", rename_all = "lowercase")]
pub enum Fingerprint {
    /// Perceptual image hash
    Image(BitVector),
    /// All three perceptual hashes of an image
    ImageSet(ImageHashes),
    /// Sampled video frames
    Video(VideoFingerprint),
    /// Shingled document text
    Document(TextFingerprint),
    /// Shingled code tokens
    Code(TextFingerprint),
    /// Normalized archive content hash
    Archive([u8; 32]),
}

impl Fingerprint {
    /// The family this fingerprint belongs to.
    #[must_use]
    pub fn family(&self) -> ContentFamily {
        match self {
            Self::Image(_) | Self::ImageSet(_) => ContentFamily::Image,
            Self::Video(_) => ContentFamily::Video,
            Self::Document(_) => ContentFamily::Document,
            Self::Code(_) => ContentFamily::Code,
            Self::Archive(_) => ContentFamily::Archive,
        }
    }
}

/// Per-file failure category recorded on a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Permission or I/O failure (`IOError`)
    Unreadable,
    /// Corrupt or unparseable for the declared family (`UnsupportedFormat`)
    Unsupported,
    /// Per-file time budget exceeded (`ExtractionTimeout`)
    Timeout,
}

impl ErrorKind {
    /// Stable name stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreadable => "io_error",
            Self::Unsupported => "unsupported_format",
            Self::Timeout => "extraction_timeout",
        }
    }

    /// Parse a stored name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "io_error" => Some(Self::Unreadable),
            "unsupported_format" => Some(Self::Unsupported),
            "extraction_timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while fingerprinting a single file.
///
/// These never abort a scan: the record is marked failed and the scan
/// moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// The file could not be read.
    #[error("Cannot read {path}: {detail}")]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// Underlying cause
        detail: String,
    },

    /// The file is corrupt or not parseable as its declared family.
    #[error("Unsupported format for {path}: {detail}")]
    Unsupported {
        /// File that failed
        path: PathBuf,
        /// Underlying cause
        detail: String,
    },

    /// Extraction exceeded the per-file budget.
    #[error("Extraction of {path} exceeded {budget:?}")]
    Timeout {
        /// File that failed
        path: PathBuf,
        /// The budget that was exceeded
        budget: Duration,
    },
}

impl ExtractionError {
    /// Build an [`ExtractionError::Unreadable`].
    pub fn unreadable(path: &Path, detail: impl fmt::Display) -> Self {
        Self::Unreadable {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    /// Build an [`ExtractionError::Unsupported`].
    pub fn unsupported(path: &Path, detail: impl fmt::Display) -> Self {
        Self::Unsupported {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    /// Classify an I/O error: malformed data is a format problem, anything
    /// else means the file could not be read.
    #[must_use]
    pub fn from_io(path: &Path, error: &std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                Self::unsupported(path, error)
            }
            _ => Self::unreadable(path, error),
        }
    }

    /// The recorded category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreadable { .. } => ErrorKind::Unreadable,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Human-readable detail without the path.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Unreadable { detail, .. } | Self::Unsupported { detail, .. } => detail.clone(),
            Self::Timeout { budget, .. } => format!("exceeded {budget:?}"),
        }
    }
}

/// Wall-clock limit on one extraction.
///
/// Extractors that hand work to child processes check it so a hung decoder
/// is killed instead of outliving the extraction that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// No limit.
    pub const NONE: Self = Self {
        at: None,
        budget: Duration::ZERO,
    };

    /// Expire `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
        }
    }

    /// Time left, or `None` without a limit.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the limit has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// The error recorded for `path` once the limit has passed.
    #[must_use]
    pub fn timeout_error(&self, path: &Path) -> ExtractionError {
        ExtractionError::Timeout {
            path: path.to_path_buf(),
            budget: self.budget,
        }
    }
}

/// Tunables for the extractors.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorSettings {
    /// Perceptual hash algorithm for images and video frames
    pub algorithm: PerceptualAlgorithm,
    /// Perceptual hash edge length (bits = size * size)
    pub hash_size: u32,
    /// Video frame sampling plan
    pub sampling: FrameSampling,
    /// Words (or tokens) per shingle
    pub shingle_size: usize,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            algorithm: PerceptualAlgorithm::default(),
            hash_size: 8,
            sampling: FrameSampling::default(),
            shingle_size: shingle::DEFAULT_SHINGLE_SIZE,
        }
    }
}

/// Family dispatch over the individual extractors.
///
/// The text and frame sources are black boxes behind traits so callers can
/// swap in OCR-backed or in-process decoders.
pub struct ExtractorSet {
    hasher: PerceptualHasher,
    text: Arc<dyn TextExtractor>,
    frames: Arc<dyn FrameSource>,
    sampling: FrameSampling,
    shingle_size: usize,
}

impl fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorSet")
            .field("hasher", &self.hasher)
            .field("sampling", &self.sampling)
            .field("shingle_size", &self.shingle_size)
            .finish_non_exhaustive()
    }
}

impl Default for ExtractorSet {
    fn default() -> Self {
        Self::new(&ExtractorSettings::default())
    }
}

impl ExtractorSet {
    /// Build the default extractors.
    #[must_use]
    pub fn new(settings: &ExtractorSettings) -> Self {
        Self {
            hasher: PerceptualHasher::new(settings.algorithm).with_hash_size(settings.hash_size),
            text: Arc::new(DocumentExtractor),
            frames: Arc::new(FfmpegFrameSource::default()),
            sampling: settings.sampling.clone(),
            shingle_size: settings.shingle_size.max(1),
        }
    }

    /// Replace the document text extractor.
    #[must_use]
    pub fn with_text_extractor(mut self, text: Arc<dyn TextExtractor>) -> Self {
        self.text = text;
        self
    }

    /// Replace the video frame source.
    #[must_use]
    pub fn with_frame_source(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = frames;
        self
    }

    /// The perceptual hasher shared by images and video frames.
    #[must_use]
    pub fn hasher(&self) -> &PerceptualHasher {
        &self.hasher
    }

    /// Fingerprint `path` as a member of `family`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::Unsupported`] for [`ContentFamily::Other`]
    /// and for content the family's extractor cannot parse, and
    /// [`ExtractionError::Unreadable`] for I/O failures.
    pub fn extract(&self, path: &Path, family: ContentFamily) -> Result<Fingerprint, ExtractionError> {
        self.extract_within(path, family, Deadline::NONE)
    }

    /// [`ExtractorSet::extract`] bounded by `deadline`. Child processes
    /// still running when it passes are killed.
    ///
    /// # Errors
    ///
    /// As [`ExtractorSet::extract`], plus [`ExtractionError::Timeout`].
    pub fn extract_within(
        &self,
        path: &Path,
        family: ContentFamily,
        deadline: Deadline,
    ) -> Result<Fingerprint, ExtractionError> {
        log::trace!("Extracting {} as {}", path.display(), family);
        match family {
            ContentFamily::Image => self.hasher.fingerprint_path(path),
            ContentFamily::Document => {
                let raw = self.text.extract_text(path)?;
                let text = document::normalize_text(&raw);
                let shingles = shingle::word_shingles(&text, self.shingle_size);
                Ok(Fingerprint::Document(TextFingerprint { text, shingles }))
            }
            ContentFamily::Code => {
                let bytes = std::fs::read(path).map_err(|e| ExtractionError::from_io(path, &e))?;
                let source = String::from_utf8_lossy(&bytes);
                let normalizer = CodeNormalizer::for_path(path);
                let tokens = normalizer.tokens(&source);
                let shingles = shingle::token_shingles(&tokens, self.shingle_size);
                Ok(Fingerprint::Code(TextFingerprint {
                    text: tokens.join(" "),
                    shingles,
                }))
            }
            ContentFamily::Video => {
                video::fingerprint_video(
                    self.frames.as_ref(),
                    &self.hasher,
                    &self.sampling,
                    path,
                    deadline,
                )
                .map(Fingerprint::Video)
            }
            ContentFamily::Archive => archive_hash(path).map(Fingerprint::Archive),
            ContentFamily::Other => Err(ExtractionError::unsupported(
                path,
                "files outside the known content families are not fingerprinted",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_bit_vector_masks_spare_bits() {
        let v = BitVector::new(vec![0xFF, 0xFF], 12).unwrap();
        assert_eq!(v.as_bytes(), &[0xFF, 0xF0]);
        assert_eq!(v.len(), 12);
        assert!(BitVector::new(vec![0xFF], 12).is_none());
    }

    #[test]
    fn test_hamming_distance() {
        let a = BitVector::from_bytes(vec![0b1010_1010, 0x00]);
        let b = BitVector::from_bytes(vec![0b1010_1011, 0x01]);
        assert_eq!(a.hamming(&b), Some(2));
        assert_eq!(a.hamming(&a), Some(0));

        let short = BitVector::from_bytes(vec![0]);
        assert_eq!(a.hamming(&short), None);
    }

    #[test]
    fn test_band_keys_cover_all_bits() {
        let v = BitVector::from_bytes(vec![0xAB, 0xCD]);
        let keys: Vec<_> = (0..4).map(|b| v.band_key(b, 4)).collect();
        assert_eq!(keys, vec![vec![0xA0], vec![0xB0], vec![0xC0], vec![0xD0]]);

        // remainder goes to the last band
        let v = BitVector::new(vec![0xFF, 0xE0], 11).unwrap();
        assert_eq!(v.band_key(0, 2), vec![0xF8]);
        assert_eq!(v.band_key(1, 2), vec![0xFC]);
    }

    #[test]
    fn test_fingerprint_family_tag() {
        let fp = Fingerprint::Archive([7; 32]);
        assert_eq!(fp.family(), ContentFamily::Archive);
        let json = serde_json::to_string(&fp).unwrap();
        assert!(json.contains("\"family\":\"archive\""));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[test]
    fn test_error_kind_names() {
        for kind in [ErrorKind::Unreadable, ErrorKind::Unsupported, ErrorKind::Timeout] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::Unreadable.to_string(), "io_error");
    }

    #[test]
    fn test_io_error_classification() {
        let path = Path::new("/x");
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(ExtractionError::from_io(path, &denied).kind(), ErrorKind::Unreadable);
        let bad = std::io::Error::from(std::io::ErrorKind::InvalidData);
        assert_eq!(ExtractionError::from_io(path, &bad).kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_extract_document_and_code() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("a.txt");
        fs::write(&doc, "The quick, brown fox jumps over the lazy dog!").unwrap();
        let code = dir.path().join("a.rs");
        fs::write(&code, "fn main() { // entry\n    println!(\"hi\");\n}\n").unwrap();

        let set = ExtractorSet::default();
        match set.extract(&doc, ContentFamily::Document).unwrap() {
            Fingerprint::Document(t) => {
                assert_eq!(t.text, "the quick brown fox jumps over the lazy dog");
                assert_eq!(t.shingles.len(), 7);
            }
            other => panic!("unexpected fingerprint {other:?}"),
        }
        match set.extract(&code, ContentFamily::Code).unwrap() {
            Fingerprint::Code(t) => assert!(!t.text.contains("entry")),
            other => panic!("unexpected fingerprint {other:?}"),
        }
    }

    #[test]
    fn test_extract_other_is_unsupported() {
        let set = ExtractorSet::default();
        let err = set
            .extract(Path::new("/tmp/whatever.bin"), ContentFamily::Other)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_extract_missing_file_is_unreadable() {
        let set = ExtractorSet::default();
        let err = set
            .extract(Path::new("/non/existent/file.rs"), ContentFamily::Code)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreadable);
    }
}
