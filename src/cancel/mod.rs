//! Cancellation for long-running waits
//!
//! A [`CancelToken`] is shared between the ctrl-c handler and whatever is
//! blocking: the poller, token acquisition, retry backoff. The first interrupt
//! requests cancellation; blocked sleeps notice within one slice and return.
//! A second interrupt exits the process immediately.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Granularity at which sleeps check for cancellation
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct CancelState {
    cancel_requested: AtomicBool,
    signal_count: AtomicU8,
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel blocked waits
    InitiateCancellation,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Returned by [`CancelToken::sleep`] when cancellation interrupted it
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Shared, cloneable cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel_requested.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation has been requested
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn signal_count(&self) -> u8 {
        self.state.signal_count.load(Ordering::SeqCst)
    }

    /// Handle an interrupt and report what the caller should do
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.state.signal_count.fetch_add(1, Ordering::SeqCst);
        match count {
            0 => {
                self.cancel();
                SignalAction::InitiateCancellation
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }

    /// Sleep for `duration`, waking early if cancelled
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let start = Instant::now();
        loop {
            self.check()?;
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(duration - elapsed));
        }
    }

    /// Route ctrl-c (SIGINT/SIGTERM) to this token. Call once per process.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || match token.handle_signal() {
            SignalAction::InitiateCancellation => {
                tracing::warn!("interrupt received, cancelling (press again to exit now)");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
