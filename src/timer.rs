//! Resettable one-shot expiry timers.
//!
//! Stored table entries are lifetime-bounded. Each one owns an
//! [`ExpiryTimer`]: a small background task parked on the entry's deadline,
//! which fires exactly once by pushing an identifying event into an mpsc
//! sink. The owning component's processing task then re-looks the entry up
//! by that identifier, so a fired timer can never observe an entry another
//! task already removed. Dropping the handle cancels the task, and resetting
//! the deadline re-parks it without respawning.

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Handle to a pending expiry. The timer fires once, when the configured
/// deadline passes without an intervening [`reset`](Self::reset) or drop.
pub(crate) struct ExpiryTimer {
    deadline: watch::Sender<Instant>,
    cancel: CancellationToken,
}

impl ExpiryTimer {
    /// Arm a timer for `deadline` which delivers `event` on `sink` when it
    /// fires. Events for entries which no longer exist are harmless, the
    /// receiver re-checks against its store.
    pub fn spawn<T: Send + 'static>(
        deadline: Instant,
        sink: mpsc::Sender<T>,
        event: T,
    ) -> ExpiryTimer {
        let (deadline_tx, mut deadline_rx) = watch::channel(deadline);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            loop {
                let at = *deadline_rx.borrow_and_update();
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        // Deadline moved, park on the new value.
                    }
                    _ = sleep_until(at) => {
                        let _ = sink.send(event).await;
                        return;
                    }
                }
            }
        });

        ExpiryTimer {
            deadline: deadline_tx,
            cancel,
        }
    }

    /// Move the deadline. A timer which already fired stays fired; callers
    /// replace the timer wholesale when an entry changes state.
    pub fn reset(&self, deadline: Instant) {
        let _ = self.deadline.send(deadline);
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
