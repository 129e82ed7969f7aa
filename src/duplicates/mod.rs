//! Duplicate detection module.
//!
//! This module provides functionality for:
//! - Per-family similarity scoring
//! - Candidate-pair bucketing for large families
//! - Union-find clustering into duplicate groups
//! - Representative selection and group bookkeeping

pub mod bucket;
pub mod grouper;
pub mod groups;
pub mod similarity;
pub mod union_find;

pub use bucket::BucketConfig;
pub use grouper::{Grouper, GrouperConfig, DEFAULT_THRESHOLD};
pub use groups::{DuplicateGroup, GroupId, GroupMember};
pub use similarity::{Comparator, CompareError};
