//! Content families and extension-based classification.
//!
//! Every enumerated file is bucketed into exactly one [`ContentFamily`]
//! by its (lowercased) extension. Files that match no known extension land
//! in [`ContentFamily::Other`], which is never deduplicated.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of content families the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFamily {
    /// Raster images (perceptual hash).
    Image,
    /// Text-bearing documents (shingled normalized text).
    Document,
    /// Video files (sequence of per-frame perceptual hashes).
    Video,
    /// Archives and compressed containers (content hash).
    Archive,
    /// Source code (shingled token stream).
    Code,
    /// Anything else. Counted, never fingerprinted.
    Other,
}

impl ContentFamily {
    /// Families that produce fingerprints and can form duplicate groups.
    pub const DEDUPLICABLE: [ContentFamily; 5] = [
        ContentFamily::Image,
        ContentFamily::Document,
        ContentFamily::Video,
        ContentFamily::Archive,
        ContentFamily::Code,
    ];

    /// File extensions (lowercase, without the dot) belonging to this family.
    #[must_use]
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Image => &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"],
            Self::Document => &[
                "txt", "md", "docx", "odt", "pdf", "rtf", "srt", "vtt", "sub",
            ],
            Self::Video => &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"],
            Self::Archive => &["zip", "tar", "tgz", "gz", "bz2", "xz", "7z", "rar", "zst"],
            Self::Code => &[
                "py", "js", "ts", "exs", "ex", "html", "css", "jsx", "tsx", "vue", "rs", "go",
                "cpp", "cc", "c", "h", "hpp", "java", "sh",
            ],
            Self::Other => &[],
        }
    }

    /// Classify a path by its extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        if extension.is_empty() {
            return Self::Other;
        }

        Self::DEDUPLICABLE
            .into_iter()
            .find(|family| family.extensions().contains(&extension.as_str()))
            .unwrap_or(Self::Other)
    }

    /// Stable lowercase name, used in the store and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Archive => "archive",
            Self::Code => "code",
            Self::Other => "other",
        }
    }

    /// Whether files of this family are ever fingerprinted.
    #[must_use]
    pub fn is_deduplicable(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

impl fmt::Display for ContentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown family name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content family '{0}'")]
pub struct UnknownFamily(pub String);

impl FromStr for ContentFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" | "images" => Ok(Self::Image),
            "document" | "documents" | "doc" => Ok(Self::Document),
            "video" | "videos" => Ok(Self::Video),
            "archive" | "archives" => Ok(Self::Archive),
            "code" => Ok(Self::Code),
            "other" => Ok(Self::Other),
            _ => Err(UnknownFamily(s.to_string())),
        }
    }
}
