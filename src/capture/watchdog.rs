//! One-shot watchdog timer and the single-use teardown guard it shares
//! with the normal close path.
//!
//! The watchdog is armed at session start and disarmed at session end.
//! If it fires it invokes the same close operation the normal path would;
//! the guard's atomic flag guarantees at-most-one close even when both
//! paths race.

use crate::renderer::RenderContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::warn;

/// Shared close guard for one rendering context.
pub struct TeardownGuard {
    context: Arc<dyn RenderContext>,
    closed: AtomicBool,
}

impl TeardownGuard {
    pub fn new(context: Arc<dyn RenderContext>) -> Arc<Self> {
        Arc::new(Self {
            context,
            closed: AtomicBool::new(false),
        })
    }

    /// Close the underlying context exactly once.
    ///
    /// Returns true when this call performed the close. Close-time errors
    /// are logged and swallowed; the run summary is already determined by
    /// the time anyone closes.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.context.close().await {
            warn!(error = %e, "render context close failed");
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A one-shot, time-triggered cancellation for one capture session.
pub struct Watchdog {
    fired: watch::Receiver<bool>,
    cancel: Arc<Notify>,
}

impl Watchdog {
    /// Arm the watchdog: after `ceiling` of wall-clock time it forces
    /// teardown through the guard, regardless of what the main control
    /// flow is doing.
    pub fn arm(ceiling: Duration, guard: Arc<TeardownGuard>) -> Self {
        let (tx, fired) = watch::channel(false);
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::clone(&cancel);
        tokio::spawn(async move {
            // biased: a disarm that lands together with the deadline must
            // win, or a finished session could still get its context
            // yanked.
            tokio::select! {
                biased;
                _ = cancelled.notified() => {}
                _ = tokio::time::sleep(ceiling) => {
                    let _ = tx.send(true);
                    warn!(ceiling_ms = ceiling.as_millis() as u64, "hard ceiling exceeded, forcing teardown");
                    guard.close().await;
                }
            }
        });
        Self { fired, cancel }
    }

    /// Whether the ceiling has been exceeded.
    pub fn has_fired(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolves when the watchdog fires. Pends forever once disarmed.
    pub async fn fired(&self) {
        let mut rx = self.fired.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Disarm the timer. Returns true when the watchdog had already
    /// fired; a fired watchdog finishes its forced close on its own.
    pub fn disarm(self) -> bool {
        // notify_one stores a permit, so cancellation lands even if the
        // timer task has not been polled yet.
        self.cancel.notify_one();
        *self.fired.borrow()
    }
}
