//! neardupe - resumable near-duplicate file finder
//!
//! Fingerprints images, documents, videos, archives and source code, groups
//! files whose fingerprints are similar above a threshold, and keeps every
//! fingerprint in a SQLite store so scans can be paused, resumed and
//! rescanned incrementally.
//!
//! The entry point for library users is [`session::ScanEngine`].

pub mod actions;
mod app;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod session;
pub mod signal;
pub mod store;

pub use app::run_app;
