//! Application configuration management.
//!
//! Settings are layered with `figment`, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (the platform config dir, or `--config PATH`)
//! 3. `NEARDUPE_*` environment variables (`__` separates nested keys, e.g.
//!    `NEARDUPE_GROUPING__LSH_BANDS=12`)
//! 4. Command-line flags, applied by the caller

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duplicates::{BucketConfig, GrouperConfig, DEFAULT_THRESHOLD};
use crate::fingerprint::{ExtractorSettings, FrameSampling, PerceptualAlgorithm};
use crate::orchestrator::control::num_cpus_fallback;
use crate::scanner::{ContentFamily, WalkerConfig};
use crate::session::EngineSettings;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NEARDUPE_";

/// A setting that cannot be used.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    /// Threshold outside (0, 1].
    #[error("threshold must be in (0, 1], got {0}")]
    Threshold(f64),

    /// Unknown content family name.
    #[error("unknown content family '{name}'{}", hint(.suggestion))]
    UnknownFamily {
        /// Name as written
        name: String,
        /// Closest known family, if any is close
        suggestion: Option<String>,
    },

    /// No family selected.
    #[error("at least one content family must be selected")]
    NoFamilies,

    /// A numeric tunable out of range.
    #[error("{key} must be {expected}")]
    OutOfRange {
        /// Dotted key
        key: &'static str,
        /// Human readable range
        expected: &'static str,
    },
}

/// Perceptual hashing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptualConfig {
    /// phash, dhash or ahash
    pub algorithm: PerceptualAlgorithm,
    /// Hash edge length; the hash has `hash_size²` bits
    pub hash_size: u32,
}

impl Default for PerceptualConfig {
    fn default() -> Self {
        Self {
            algorithm: PerceptualAlgorithm::default(),
            hash_size: 8,
        }
    }
}

/// Video sampling and alignment settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames per video at least (never fewer than 3)
    pub frames: usize,
    /// Sampling interval in seconds; 0 samples by count only
    pub interval_secs: Option<f64>,
    /// Upper bound on frames per video
    pub max_frames: usize,
    /// Largest frame offset tried when aligning two videos
    pub align_window: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        let sampling = FrameSampling::default();
        Self {
            frames: sampling.frames,
            interval_secs: sampling.interval_secs,
            max_frames: sampling.max_frames,
            align_window: GrouperConfig::default().align_window,
        }
    }
}

/// Candidate bucketing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Bands per perceptual hash
    pub lsh_bands: usize,
    /// Largest text family compared pairwise
    pub pairwise_cap: usize,
    /// MinHash bands beyond the cap
    pub minhash_bands: usize,
    /// MinHash rows per band
    pub minhash_rows: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        let buckets = BucketConfig::default();
        Self {
            lsh_bands: buckets.lsh_bands,
            pairwise_cap: buckets.pairwise_cap,
            minhash_bands: buckets.minhash_bands,
            minhash_rows: buckets.minhash_rows,
        }
    }
}

/// Text fingerprint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Tokens per shingle
    pub shingle_size: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            shingle_size: ExtractorSettings::default().shingle_size,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default similarity threshold for new sessions
    pub threshold: f64,
    /// Default families for new sessions
    pub families: Vec<String>,
    /// Extraction workers; 0 uses every available core
    pub workers: usize,
    /// Per-file extraction budget in seconds
    pub timeout_secs: u64,
    /// Fingerprint database; defaults to the platform data dir
    pub database: Option<PathBuf>,
    /// Follow symbolic links while walking
    pub follow_symlinks: bool,
    /// Directory names never entered
    pub exclude_dirs: Vec<String>,
    /// Gitignore-style patterns to skip
    pub ignore_patterns: Vec<String>,
    /// Perceptual hashing
    pub perceptual: PerceptualConfig,
    /// Video sampling
    pub video: VideoConfig,
    /// Candidate bucketing
    pub grouping: GroupingConfig,
    /// Text fingerprints
    pub text: TextConfig,
}

impl Default for Config {
    fn default() -> Self {
        let walker = WalkerConfig::default();
        Self {
            threshold: DEFAULT_THRESHOLD,
            families: ContentFamily::DEDUPLICABLE
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
            workers: 0,
            timeout_secs: 60,
            database: None,
            follow_symlinks: walker.follow_symlinks,
            exclude_dirs: walker.exclude_dirs,
            ignore_patterns: walker.ignore_patterns,
            perceptual: PerceptualConfig::default(),
            video: VideoConfig::default(),
            grouping: GroupingConfig::default(),
            text: TextConfig::default(),
        }
    }
}

impl Config {
    /// Load the configuration from `path`, or from the default
    /// platform-specific path when `None`, then apply the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file does not exist or any
    /// layer has a value of the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("config file {} does not exist", p.display());
                }
                Some(p.to_path_buf())
            }
            None => Self::config_path().ok().filter(|p| p.exists()),
        };
        let config = Self::figment(file.as_deref())
            .extract()
            .context("invalid configuration")?;
        if let Some(f) = file {
            log::debug!("Loaded configuration from {}", f.display());
        }
        Ok(config)
    }

    /// The layered provider, exposed for tests and diagnostics.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check every value and resolve the family names.
    ///
    /// # Errors
    ///
    /// The first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<Vec<ContentFamily>, ConfigurationError> {
        validate_threshold(self.threshold)?;
        let families = parse_families(&self.families)?;
        if self.timeout_secs == 0 {
            return Err(ConfigurationError::OutOfRange {
                key: "timeout_secs",
                expected: "at least 1",
            });
        }
        if self.perceptual.hash_size < 2 {
            return Err(ConfigurationError::OutOfRange {
                key: "perceptual.hash_size",
                expected: "at least 2",
            });
        }
        if self.grouping.lsh_bands == 0 {
            return Err(ConfigurationError::OutOfRange {
                key: "grouping.lsh_bands",
                expected: "at least 1",
            });
        }
        if self.grouping.minhash_bands == 0 || self.grouping.minhash_rows == 0 {
            return Err(ConfigurationError::OutOfRange {
                key: "grouping.minhash_bands/minhash_rows",
                expected: "at least 1",
            });
        }
        if self.text.shingle_size == 0 {
            return Err(ConfigurationError::OutOfRange {
                key: "text.shingle_size",
                expected: "at least 1",
            });
        }
        Ok(families)
    }

    /// Worker count with `0` resolved to the available parallelism.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus_fallback()
        } else {
            self.workers
        }
    }

    /// Database path, explicit or under the platform data dir.
    ///
    /// # Errors
    ///
    /// Fails when no home directory can be determined.
    pub fn database_path(&self) -> Result<PathBuf> {
        match self.database {
            Some(ref path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join("fingerprints.db")),
        }
    }

    /// Extractor tunables.
    #[must_use]
    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            algorithm: self.perceptual.algorithm,
            hash_size: self.perceptual.hash_size,
            sampling: FrameSampling {
                frames: self.video.frames,
                interval_secs: self.video.interval_secs,
                max_frames: self.video.max_frames,
            },
            shingle_size: self.text.shingle_size,
        }
    }

    /// Engine tunables.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workers: self.effective_workers(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            grouper: GrouperConfig {
                threshold: self.threshold,
                align_window: self.video.align_window,
                buckets: BucketConfig {
                    lsh_bands: self.grouping.lsh_bands,
                    pairwise_cap: self.grouping.pairwise_cap,
                    minhash_bands: self.grouping.minhash_bands,
                    minhash_rows: self.grouping.minhash_rows,
                },
            },
            walker: WalkerConfig::new(
                self.follow_symlinks,
                self.exclude_dirs.clone(),
                self.ignore_patterns.clone(),
            ),
        }
    }

    /// Save the configuration as TOML to `path`, or to the default
    /// platform-specific path. Returns the path written.
    ///
    /// # Errors
    ///
    /// Fails if the file or its directory cannot be written.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("cannot serialize configuration")?;
        fs::write(&path, content).with_context(|| format!("cannot write {}", path.display()))?;
        Ok(path)
    }

    /// Get the default platform-specific configuration path.
    ///
    /// # Errors
    ///
    /// Fails when no home directory can be determined.
    pub fn config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }
}

fn hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" - did you mean '{s}'?"))
        .unwrap_or_default()
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "neardupe", "neardupe")
        .ok_or_else(|| anyhow::anyhow!("Failed to determine project directories"))
}

/// Check a similarity threshold.
///
/// # Errors
///
/// [`ConfigurationError::Threshold`] outside (0, 1].
pub fn validate_threshold(threshold: f64) -> Result<f64, ConfigurationError> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= 1.0 {
        Ok(threshold)
    } else {
        Err(ConfigurationError::Threshold(threshold))
    }
}

/// Resolve family names, suggesting the closest match for typos.
///
/// # Errors
///
/// [`ConfigurationError::UnknownFamily`] for names that are not a
/// deduplicable family, [`ConfigurationError::NoFamilies`] for an empty
/// list.
pub fn parse_families<S: AsRef<str>>(names: &[S]) -> Result<Vec<ContentFamily>, ConfigurationError> {
    let mut families = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref().trim();
        match name.parse::<ContentFamily>() {
            Ok(family) if family.is_deduplicable() => families.push(family),
            _ => {
                return Err(ConfigurationError::UnknownFamily {
                    name: name.to_string(),
                    suggestion: suggest_family(name),
                })
            }
        }
    }
    if families.is_empty() {
        return Err(ConfigurationError::NoFamilies);
    }
    families.sort();
    families.dedup();
    Ok(families)
}

fn suggest_family(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    ContentFamily::DEDUPLICABLE
        .iter()
        .map(|f| (f.as_str(), strsim::jaro_winkler(&lower, f.as_str())))
        .filter(|(_, score)| *score >= 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, _)| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        let families = config.validate().unwrap();
        assert_eq!(families.len(), 5);
        assert_eq!(config.engine_settings().grouper.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(validate_threshold(1.0).is_ok());
        assert!(validate_threshold(0.01).is_ok());
        assert_eq!(
            validate_threshold(0.0),
            Err(ConfigurationError::Threshold(0.0))
        );
        assert!(validate_threshold(1.5).is_err());
        assert!(validate_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_family_typo_gets_suggestion() {
        let err = parse_families(&["imgae"]).unwrap_err();
        match err {
            ConfigurationError::UnknownFamily { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("image"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err_message(&["vidoe"]).contains("did you mean 'video'"));
    }

    fn err_message(names: &[&str]) -> String {
        parse_families(names).unwrap_err().to_string()
    }

    #[test]
    fn test_other_family_is_rejected() {
        assert!(matches!(
            parse_families(&["other"]),
            Err(ConfigurationError::UnknownFamily { .. })
        ));
        assert_eq!(
            parse_families::<&str>(&[]),
            Err(ConfigurationError::NoFamilies)
        );
    }

    #[test]
    fn test_families_are_deduplicated() {
        let families = parse_families(&["code", "image", "code"]).unwrap();
        assert_eq!(families, vec![ContentFamily::Image, ContentFamily::Code]);
    }

    #[test]
    fn test_zero_workers_means_all_cores() {
        let config = Config {
            workers: 0,
            ..Config::default()
        };
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_save_and_reload_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            threshold: 0.9,
            families: vec!["image".into()],
            ..Config::default()
        };
        config.save(Some(&path)).unwrap();

        let loaded: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .extract()
            .unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
