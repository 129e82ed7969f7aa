//! Ctrl+C handling: pause the running session instead of killing it.
//!
//! The first Ctrl+C sets an interrupt flag. A [`PauseOnInterrupt`] watcher
//! turns that flag into [`ScanEngine::pause`], so in-flight extractions
//! finish, the session is persisted as `Paused`, and `neardupe resume <ID>`
//! continues later. A second Ctrl+C exits immediately with code 130; the
//! store stays consistent and the next `resume` retries interrupted files.
//!
//! ```rust,no_run
//! use neardupe::signal::install_handler;
//!
//! let handler = install_handler().expect("Failed to install signal handler");
//! if handler.is_interrupted() {
//!     println!("Interrupted");
//! }
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::session::{ScanEngine, SessionId};

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

const WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Shared interrupt flag set by Ctrl+C.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandler {
    flag: Arc<AtomicBool>,
    presses: Arc<AtomicUsize>,
}

impl InterruptHandler {
    /// A handler with no interrupt recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether Ctrl+C was pressed (or [`InterruptHandler::interrupt`] called).
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Record an interrupt. Returns how many were recorded so far.
    pub fn interrupt(&self) -> usize {
        self.flag.store(true, Ordering::SeqCst);
        self.presses.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Forget earlier interrupts.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        self.presses.store(0, Ordering::SeqCst);
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_HANDLER: OnceLock<InterruptHandler> = OnceLock::new();

/// Install the process-wide Ctrl+C handler, or return the installed one
/// with its flag reset.
///
/// # Errors
///
/// Fails if another Ctrl+C handler was registered outside this module.
pub fn install_handler() -> Result<InterruptHandler, SignalError> {
    if let Some(handler) = GLOBAL_HANDLER.get() {
        handler.reset();
        return Ok(handler.clone());
    }

    let handler = InterruptHandler::new();
    let hooked = handler.clone();
    ctrlc::set_handler(move || {
        let mut stderr = std::io::stderr();
        if hooked.interrupt() > 1 {
            let _ = writeln!(stderr, "\nInterrupted again, exiting.");
            let _ = stderr.flush();
            std::process::exit(EXIT_CODE_INTERRUPTED);
        }
        let _ = writeln!(
            stderr,
            "\nPausing after in-flight files finish (Ctrl+C again to exit now)..."
        );
        let _ = stderr.flush();
        log::info!("Interrupt received");
    })?;
    let _ = GLOBAL_HANDLER.set(handler.clone());
    Ok(handler)
}

/// Background watcher pausing one session when the interrupt flag is set.
///
/// Stops when dropped.
pub struct PauseOnInterrupt {
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PauseOnInterrupt {
    /// Start watching `handler` on behalf of session `id`.
    #[must_use]
    pub fn watch(handler: &InterruptHandler, engine: Arc<ScanEngine>, id: SessionId) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = Arc::clone(&done);
        let handler = handler.clone();
        let thread = std::thread::Builder::new()
            .name("neardupe-interrupt".to_string())
            .spawn(move || {
                while !thread_done.load(Ordering::SeqCst) {
                    if handler.is_interrupted() {
                        if let Err(e) = engine.pause(id) {
                            log::warn!("Could not pause session {id}: {e}");
                        }
                        return;
                    }
                    std::thread::sleep(WATCH_INTERVAL);
                }
            })
            .map_err(|e| log::warn!("Ctrl+C will not pause the scan: {e}"))
            .ok();
        Self { done, thread }
    }
}

impl Drop for PauseOnInterrupt {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
