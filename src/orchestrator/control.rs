//! Cooperative pause/cancel signalling and live tunables.
//!
//! A [`ScanControl`] is shared between the engine, which flips it, and the
//! orchestrator, which polls it between file claims. It wraps the same kind
//! of `Arc<AtomicBool>` stop flag the walker already understands, plus a
//! second flag that tells a pause apart from a cancel.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default per-file extraction budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// What the orchestrator should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep dispatching
    Run,
    /// Stop dispatching, finish in-flight work, stay resumable
    Pause,
    /// Stop dispatching, finish in-flight work, end the session
    Cancel,
}

/// Shared control block for one running session.
#[derive(Debug)]
pub struct ScanControl {
    stop: Arc<AtomicBool>,
    cancelled: AtomicBool,
    workers: AtomicUsize,
    timeout_ms: AtomicU64,
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl ScanControl {
    /// Create a control block in the running state.
    #[must_use]
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            cancelled: AtomicBool::new(false),
            workers: AtomicUsize::new(workers.max(1)),
            timeout_ms: AtomicU64::new(millis(timeout)),
        }
    }

    /// Current signal.
    #[must_use]
    pub fn signal(&self) -> Signal {
        if !self.stop.load(Ordering::SeqCst) {
            Signal::Run
        } else if self.cancelled.load(Ordering::SeqCst) {
            Signal::Cancel
        } else {
            Signal::Pause
        }
    }

    /// Ask the run to pause. Has no effect once cancelled.
    pub fn request_pause(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the run to cancel. Overrides a pending pause.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop flag shared with the directory walker.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Desired worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    /// Change the worker count; takes effect once in-flight work drains.
    pub fn set_workers(&self, workers: usize) {
        self.workers.store(workers.max(1), Ordering::SeqCst);
    }

    /// Per-file extraction budget.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    /// Change the per-file budget; applies to the next dispatched file.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(millis(timeout), Ordering::SeqCst);
    }
}

impl Default for ScanControl {
    fn default() -> Self {
        Self::new(num_cpus_fallback(), DEFAULT_TIMEOUT)
    }
}

/// Available parallelism, or 1 when it cannot be determined.
#[must_use]
pub fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_transitions() {
        let control = ScanControl::new(2, Duration::from_secs(1));
        assert_eq!(control.signal(), Signal::Run);
        control.request_pause();
        assert_eq!(control.signal(), Signal::Pause);
        assert!(control.stop_flag().load(Ordering::SeqCst));
        control.request_cancel();
        assert_eq!(control.signal(), Signal::Cancel);
        control.request_pause();
        assert_eq!(control.signal(), Signal::Cancel);
    }

    #[test]
    fn test_tunables_are_clamped() {
        let control = ScanControl::new(0, Duration::ZERO);
        assert_eq!(control.workers(), 1);
        assert_eq!(control.timeout(), Duration::from_millis(1));
        control.set_workers(8);
        control.set_timeout(Duration::from_millis(250));
        assert_eq!(control.workers(), 8);
        assert_eq!(control.timeout(), Duration::from_millis(250));
    }
}
