//! Progress reporting utilities using indicatif.
//!
//! This module provides the [`TerminalProgress`] struct which implements
//! [`ProgressCallback`] to display progress bars for the phases of a scan.
//!
//! # Accessible Mode
//!
//! When accessible mode is enabled, progress reporting uses simplified output:
//! - No spinners or animations
//! - Plain ASCII bars
//! - Reduced update frequency for screen reader compatibility

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Phase name for directory enumeration.
pub const PHASE_ENUMERATING: &str = "enumerating";
/// Phase name for fingerprint extraction.
pub const PHASE_PROCESSING: &str = "processing";
/// Phase name for duplicate grouping.
pub const PHASE_GROUPING: &str = "grouping";

/// Progress callback for the phases of a scan session.
///
/// Implement this trait to receive progress updates while a session runs.
/// Callbacks are invoked from the session's worker thread.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (see the `PHASE_*` constants)
    /// * `total` - Total number of items to process, 0 if unknown
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Items done so far in this phase, including earlier runs
    /// * `path` - Path just handled
    fn on_progress(&self, current: usize, path: &str);

    /// Called when a phase completes. Not called when it is interrupted.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct TerminalProgress {
    multi: MultiProgress,
    enumerating: Mutex<Option<ProgressBar>>,
    processing: Mutex<Option<ProgressBar>>,
    grouping: Mutex<Option<ProgressBar>>,
    quiet: bool,
    accessible: bool,
}

fn slot(bar: &Mutex<Option<ProgressBar>>) -> MutexGuard<'_, Option<ProgressBar>> {
    // a poisoned bar is still a usable bar
    bar.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl TerminalProgress {
    /// Create a new progress reporter.
    ///
    /// # Examples
    ///
    /// ```
    /// use neardupe::progress::TerminalProgress;
    ///
    /// let progress = TerminalProgress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self::with_accessible(quiet, false)
    }

    /// Create a new progress reporter with accessible mode.
    #[must_use]
    pub fn with_accessible(quiet: bool, accessible: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            enumerating: Mutex::new(None),
            processing: Mutex::new(None),
            grouping: Mutex::new(None),
            quiet,
            accessible,
        }
    }

    fn spinner_style(&self) -> ProgressStyle {
        if self.accessible {
            ProgressStyle::with_template("{msg} [{elapsed_precise}] {pos} files")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
        } else {
            ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        }
    }

    fn bar_style(&self) -> ProgressStyle {
        if self.accessible {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
        } else {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} {per_sec} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
        }
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style());
        pb.set_message(message.to_string());
        let tick_rate = if self.accessible { 500 } else { 100 };
        pb.enable_steady_tick(Duration::from_millis(tick_rate));
        pb
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        match phase {
            PHASE_ENUMERATING => {
                *slot(&self.enumerating) = Some(self.spinner("Enumerating"));
            }
            PHASE_PROCESSING => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(self.bar_style());
                pb.set_message("Fingerprinting");
                *slot(&self.processing) = Some(pb);
            }
            PHASE_GROUPING => {
                *slot(&self.grouping) = Some(self.spinner("Grouping"));
            }
            _ => log::debug!("Unknown progress phase: {phase}"),
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }

        let message = truncate_path(path, 30);
        if let Some(ref pb) = *slot(&self.grouping) {
            pb.set_position(current as u64);
            pb.set_message(message);
        } else if let Some(ref pb) = *slot(&self.processing) {
            if current as u64 > pb.length().unwrap_or(0) {
                pb.set_length(current as u64);
            }
            pb.set_position(current as u64);
            pb.set_message(message);
        } else if let Some(ref pb) = *slot(&self.enumerating) {
            pb.set_position(current as u64);
            pb.set_message(message);
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        match phase {
            PHASE_ENUMERATING => {
                if let Some(pb) = slot(&self.enumerating).take() {
                    pb.finish_with_message("Enumeration complete");
                }
            }
            PHASE_PROCESSING => {
                if let Some(pb) = slot(&self.processing).take() {
                    pb.finish_with_message("Fingerprinting complete");
                }
            }
            PHASE_GROUPING => {
                if let Some(pb) = slot(&self.grouping).take() {
                    pb.finish_with_message("Grouping complete");
                }
            }
            _ => {}
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }

        for bar in [&self.grouping, &self.processing, &self.enumerating] {
            if let Some(ref pb) = *slot(bar) {
                pb.set_message(message.to_string());
                return;
            }
        }
    }
}

impl Drop for TerminalProgress {
    fn drop(&mut self) {
        // bars of an interrupted phase are abandoned, not finished
        for bar in [&self.enumerating, &self.processing, &self.grouping] {
            if let Some(pb) = slot(bar).take() {
                pb.abandon();
            }
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.len() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if file_name.chars().count() >= max_len {
        let tail: String = file_name
            .chars()
            .rev()
            .take(max_len.saturating_sub(3))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
