//! Per-family similarity functions.
//!
//! Every comparator maps a pair of same-family fingerprints to a score in
//! `[0, 1]`. All of them are symmetric and score a fingerprint against
//! itself as `1.0`.
//!
//! | Family          | Score                                               |
//! |-----------------|-----------------------------------------------------|
//! | Image           | `1 - hamming / bits`; least of three for hash sets  |
//! | Video           | best mean frame similarity over small time offsets  |
//! | Document / Code | Jaccard ratio of shingle sets                       |
//! | Archive         | `1.0` if content hashes are equal, else `0.0`       |

use crate::fingerprint::{BitVector, Fingerprint, ImageHashes, TextFingerprint, VideoFingerprint};
use crate::scanner::ContentFamily;

/// Default frame offset window for video alignment.
pub const DEFAULT_ALIGN_WINDOW: usize = 2;

/// Errors returned by [`Comparator::similarity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CompareError {
    /// The two fingerprints belong to different families.
    #[error("cannot compare a {left} fingerprint with a {right} fingerprint")]
    FamilyMismatch {
        /// Family of the first argument
        left: ContentFamily,
        /// Family of the second argument
        right: ContentFamily,
    },
}

/// Type-dispatching comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparator {
    align_window: usize,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::new(DEFAULT_ALIGN_WINDOW)
    }
}

impl Comparator {
    /// Create a comparator with the given video alignment window.
    #[must_use]
    pub fn new(align_window: usize) -> Self {
        Self { align_window }
    }

    /// Similarity of two fingerprints of the same family.
    ///
    /// # Errors
    ///
    /// [`CompareError::FamilyMismatch`] when the families differ.
    pub fn similarity(&self, a: &Fingerprint, b: &Fingerprint) -> Result<f64, CompareError> {
        match (a, b) {
            (Fingerprint::Image(x), Fingerprint::Image(y)) => Ok(bit_similarity(x, y)),
            (Fingerprint::ImageSet(x), Fingerprint::ImageSet(y)) => Ok(image_set_similarity(x, y)),
            // hashed under different settings; nothing lines up
            (Fingerprint::Image(_), Fingerprint::ImageSet(_))
            | (Fingerprint::ImageSet(_), Fingerprint::Image(_)) => Ok(0.0),
            (Fingerprint::Video(x), Fingerprint::Video(y)) => {
                Ok(video_similarity(x, y, self.align_window))
            }
            (Fingerprint::Document(x), Fingerprint::Document(y))
            | (Fingerprint::Code(x), Fingerprint::Code(y)) => Ok(shingle_similarity(x, y)),
            (Fingerprint::Archive(x), Fingerprint::Archive(y)) => {
                Ok(if x == y { 1.0 } else { 0.0 })
            }
            _ => Err(CompareError::FamilyMismatch {
                left: a.family(),
                right: b.family(),
            }),
        }
    }
}

/// `1 - hamming / bits`; vectors of different length score `0.0`.
#[must_use]
pub fn bit_similarity(a: &BitVector, b: &BitVector) -> f64 {
    match a.hamming(b) {
        Some(_) if a.is_empty() => 1.0,
        Some(distance) => 1.0 - f64::from(distance) / a.len() as f64,
        None => 0.0,
    }
}

/// The lowest of the three per-hash similarities, so a pair only matches
/// when every hash agrees.
#[must_use]
pub fn image_set_similarity(a: &ImageHashes, b: &ImageHashes) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| bit_similarity(x, y))
        .fold(1.0, f64::min)
}

/// Frame-sequence similarity tolerant of small trims.
///
/// For every constant offset `d` in `[-window, window]`, frames `a[i]` and
/// `b[i + d]` are paired and their bit similarities averaged. Offsets that
/// pair fewer than `ceil(min(n, m) / 2)` frames are ignored. The best
/// offset wins.
#[must_use]
pub fn video_similarity(a: &VideoFingerprint, b: &VideoFingerprint, window: usize) -> f64 {
    let (n, m) = (a.frames.len(), b.frames.len());
    if n == 0 || m == 0 {
        return if n == m { 1.0 } else { 0.0 };
    }
    let min_overlap = n.min(m).div_ceil(2).max(1);
    let window = window as isize;

    let mut best = 0.0f64;
    for d in -window..=window {
        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, frame) in a.frames.iter().enumerate() {
            let j = i as isize + d;
            if j < 0 || j as usize >= m {
                continue;
            }
            total += bit_similarity(frame, &b.frames[j as usize]);
            pairs += 1;
        }
        if pairs >= min_overlap {
            best = best.max(total / pairs as f64);
        }
    }
    best
}

/// Jaccard ratio of shingle sets. Both empty is `1.0`; exactly one empty
/// is `0.0`.
#[must_use]
pub fn shingle_similarity(a: &TextFingerprint, b: &TextFingerprint) -> f64 {
    let (x, y) = (&a.shingles, &b.shingles);
    match (x.is_empty(), y.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    // both sides are sorted and de-duplicated
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < x.len() && j < y.len() {
        match x[i].cmp(&y[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    let union = x.len() + y.len() - shared;
    shared as f64 / union as f64
}
