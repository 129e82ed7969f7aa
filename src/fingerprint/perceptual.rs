//! Perceptual image hashing for similarity detection.
//!
//! This module provides the `PerceptualHasher` which computes hashes for
//! images that remain stable under common transformations like resizing,
//! re-encoding and mild color changes. The same hasher is applied to
//! individual video frames.
//!
//! With [`PerceptualAlgorithm::Combined`] an image carries its aHash, pHash
//! and dHash together and two images only match as well as their least
//! similar pair of hashes. Video frames always use a single hash; under
//! `Combined` that is the pHash.

use std::path::Path;

use image::{DynamicImage, ImageError};
use image_hasher::{HashAlg, HasherConfig};
use serde::{Deserialize, Serialize};

use super::{BitVector, ExtractionError, Fingerprint, ImageHashes};

/// Supported perceptual hashing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PerceptualAlgorithm {
    /// aHash, pHash and dHash together, scored by the weakest agreement.
    #[default]
    Combined,
    /// pHash (Perceptual Hash) - DCT-based, most resilient to transformations.
    Phash,
    /// dHash (Difference Hash) - Gradient-based, very fast and effective.
    Dhash,
    /// aHash (Average Hash) - Mean-based, fast but less resilient.
    Ahash,
}

impl std::fmt::Display for PerceptualAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Combined => write!(f, "aHash+pHash+dHash"),
            Self::Phash => write!(f, "pHash"),
            Self::Dhash => write!(f, "dHash"),
            Self::Ahash => write!(f, "aHash"),
        }
    }
}

/// Computes perceptual hashes for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerceptualHasher {
    algorithm: PerceptualAlgorithm,
    hash_size: u32,
}

impl PerceptualHasher {
    /// Create a new `PerceptualHasher` with the given algorithm and an
    /// 8x8 (64-bit) hash.
    #[must_use]
    pub fn new(algorithm: PerceptualAlgorithm) -> Self {
        Self {
            algorithm,
            hash_size: 8,
        }
    }

    /// Set the hash edge length. The hash holds `size * size` bits.
    #[must_use]
    pub fn with_hash_size(mut self, size: u32) -> Self {
        self.hash_size = size.clamp(2, 64);
        self
    }

    /// Number of bits in every hash this hasher produces.
    #[must_use]
    pub fn bits(&self) -> usize {
        (self.hash_size * self.hash_size) as usize
    }

    fn config(&self, algorithm: PerceptualAlgorithm) -> HasherConfig {
        let config = HasherConfig::new().hash_size(self.hash_size, self.hash_size);
        match algorithm {
            PerceptualAlgorithm::Phash | PerceptualAlgorithm::Combined => {
                config.hash_alg(HashAlg::Median).preproc_dct()
            }
            PerceptualAlgorithm::Dhash => config.hash_alg(HashAlg::Gradient),
            PerceptualAlgorithm::Ahash => config.hash_alg(HashAlg::Mean),
        }
    }

    fn hash_with(&self, algorithm: PerceptualAlgorithm, img: &DynamicImage) -> BitVector {
        let hash = self.config(algorithm).to_hasher().hash_image(img);
        let bytes = hash.as_bytes().to_vec();
        BitVector::new(bytes.clone(), self.bits()).unwrap_or_else(|| BitVector::from_bytes(bytes))
    }

    /// Hash a decoded image with a single algorithm (pHash for
    /// [`PerceptualAlgorithm::Combined`]).
    #[must_use]
    pub fn hash_image(&self, img: &DynamicImage) -> BitVector {
        self.hash_with(self.algorithm, img)
    }

    /// Hash a decoded image with all three algorithms.
    #[must_use]
    pub fn hash_image_set(&self, img: &DynamicImage) -> ImageHashes {
        ImageHashes {
            ahash: self.hash_with(PerceptualAlgorithm::Ahash, img),
            phash: self.hash_with(PerceptualAlgorithm::Phash, img),
            dhash: self.hash_with(PerceptualAlgorithm::Dhash, img),
        }
    }

    /// Decode and hash the image at `path`.
    ///
    /// # Errors
    ///
    /// I/O failures map to [`ExtractionError::Unreadable`]; decoding
    /// failures map to [`ExtractionError::Unsupported`].
    pub fn hash_path(&self, path: &Path) -> Result<BitVector, ExtractionError> {
        Ok(self.hash_image(&open(path)?))
    }

    /// Decode the image at `path` and build its fingerprint: all three
    /// hashes under [`PerceptualAlgorithm::Combined`], one otherwise.
    ///
    /// # Errors
    ///
    /// As [`PerceptualHasher::hash_path`].
    pub fn fingerprint_path(&self, path: &Path) -> Result<Fingerprint, ExtractionError> {
        let img = open(path)?;
        Ok(match self.algorithm {
            PerceptualAlgorithm::Combined => Fingerprint::ImageSet(self.hash_image_set(&img)),
            _ => Fingerprint::Image(self.hash_image(&img)),
        })
    }

    /// Get the algorithm used by this hasher.
    #[must_use]
    pub fn algorithm(&self) -> PerceptualAlgorithm {
        self.algorithm
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new(PerceptualAlgorithm::default())
    }
}

fn open(path: &Path) -> Result<DynamicImage, ExtractionError> {
    image::open(path).map_err(|e| match e {
        ImageError::IoError(io) => ExtractionError::from_io(path, &io),
        other => ExtractionError::unsupported(path, other),
    })
}
