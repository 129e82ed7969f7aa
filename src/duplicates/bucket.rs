//! Candidate-pair generation.
//!
//! Comparing every pair in a family is quadratic, so large families are
//! first split into buckets and only pairs sharing a bucket are compared:
//!
//! - Image / video: the perceptual hash is cut into `lsh_bands` equal-width
//!   bands; two hashes share a bucket when any band matches exactly. Two
//!   hashes differing in fewer than `lsh_bands` bits always share a band.
//!   For video, any band of any frame counts; a combined image hash is
//!   banded on its pHash.
//! - Document / code: a MinHash signature of `minhash_bands * minhash_rows`
//!   values is banded the same way.
//! - Archive: exact bucketing by content hash.
//!
//! Families no larger than `pairwise_cap` skip bucketing and compare every
//! pair. None of this depends on the similarity threshold, so the candidate
//! set for a fixed input is the same at every threshold.

use std::collections::{BTreeSet, HashMap};

use crate::fingerprint::{BitVector, Fingerprint};

/// Bucketing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Bands per perceptual hash
    pub lsh_bands: usize,
    /// Largest family compared exhaustively
    pub pairwise_cap: usize,
    /// MinHash bands for text
    pub minhash_bands: usize,
    /// MinHash rows per band
    pub minhash_rows: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            lsh_bands: 8,
            pairwise_cap: 2000,
            minhash_bands: 16,
            minhash_rows: 4,
        }
    }
}

/// Bucket key: band index plus the band's content.
type BandKey = (usize, Vec<u8>);

/// Index pairs `(i, j)` with `i < j` worth comparing, sorted.
#[must_use]
pub fn candidate_pairs(fingerprints: &[&Fingerprint], config: &BucketConfig) -> Vec<(usize, usize)> {
    let n = fingerprints.len();
    if n < 2 {
        return Vec::new();
    }

    let all_archives = fingerprints
        .iter()
        .all(|fp| matches!(fp, Fingerprint::Archive(_)));

    if n <= config.pairwise_cap && !all_archives {
        log::debug!("Comparing all {} pairs of {} fingerprints", n * (n - 1) / 2, n);
        return (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
    }

    let mut buckets: HashMap<BandKey, Vec<usize>> = HashMap::new();
    for (index, fp) in fingerprints.iter().enumerate() {
        for key in band_keys(fp, config) {
            buckets.entry(key).or_default().push(index);
        }
    }

    let mut pairs = BTreeSet::new();
    for members in buckets.values() {
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                if i != j {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
    }
    log::debug!(
        "Bucketing {} fingerprints into {} buckets produced {} candidate pairs",
        n,
        buckets.len(),
        pairs.len()
    );
    pairs.into_iter().collect()
}

fn band_keys(fp: &Fingerprint, config: &BucketConfig) -> Vec<BandKey> {
    match fp {
        Fingerprint::Image(bits) => bit_band_keys(bits, config.lsh_bands),
        Fingerprint::ImageSet(hashes) => bit_band_keys(&hashes.phash, config.lsh_bands),
        Fingerprint::Video(video) => {
            let mut keys: Vec<BandKey> = video
                .frames
                .iter()
                .flat_map(|frame| bit_band_keys(frame, config.lsh_bands))
                .collect();
            keys.sort();
            keys.dedup();
            keys
        }
        Fingerprint::Document(text) | Fingerprint::Code(text) => {
            if text.shingles.is_empty() {
                return vec![(usize::MAX, Vec::new())];
            }
            let rows = config.minhash_rows.max(1);
            let signature = minhash(&text.shingles, config.minhash_bands.max(1) * rows);
            signature
                .chunks(rows)
                .enumerate()
                .map(|(band, values)| {
                    let key = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                    (band, key)
                })
                .collect()
        }
        Fingerprint::Archive(hash) => vec![(0, hash.to_vec())],
    }
}

fn bit_band_keys(bits: &BitVector, bands: usize) -> Vec<BandKey> {
    let bands = bands.clamp(1, bits.len().max(1));
    // the bit length is part of the key so different hash sizes never collide
    (0..bands)
        .map(|band| {
            let mut key = bits.band_key(band, bands);
            key.extend_from_slice(&(bits.len() as u32).to_le_bytes());
            (band, key)
        })
        .collect()
}

/// SplitMix64 finalizer, used as a family of cheap hash permutations.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// MinHash signature of a non-empty shingle set.
#[must_use]
pub fn minhash(shingles: &[u64], len: usize) -> Vec<u64> {
    (0..len as u64)
        .map(|k| {
            let seed = mix(k.wrapping_add(1));
            shingles
                .iter()
                .map(|s| mix(s ^ seed))
                .min()
                .unwrap_or(u64::MAX)
        })
        .collect()
}
