//! Operator Abort
//!
//! A cloneable abort flag checked by the executor at every iteration
//! boundary. On Unix, [`AbortSignal::with_os_signals`] additionally
//! observes SIGINT/SIGTERM through an async-signal-safe handler that only
//! sets an atomic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide flag set by the signal handler.
static SIGNALLED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = abort_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn abort_handler(_sig: libc::c_int) {
    SIGNALLED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

/// Request to stop the run at the next safe point
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    os_signals: bool,
}

impl AbortSignal {
    /// Flag that is only raised through [`AbortSignal::abort`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that is also raised by SIGINT/SIGTERM.
    ///
    /// Installs the process-wide handlers; call once per process.
    pub fn with_os_signals() -> Self {
        install_signal_handlers();
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            os_signals: true,
        }
    }

    /// Raise the flag
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether an abort has been requested
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.os_signals && SIGNALLED.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_shared_between_clones() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_aborted());

        signal.abort();
        assert!(observer.is_aborted());
    }

    #[test]
    fn test_independent_signals() {
        let a = AbortSignal::new();
        let b = AbortSignal::new();
        a.abort();
        assert!(!b.is_aborted());
    }
}
