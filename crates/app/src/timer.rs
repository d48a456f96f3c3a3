//! Debounce timer: an explicit armed deadline watched by one waiting task.
//!
//! Re-arming replaces the deadline, so a room never has more than one
//! pending expiry.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Resettable deadline. `None` means idle.
#[derive(Debug)]
pub struct DebounceTimer {
    deadline: watch::Sender<Option<Instant>>,
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DebounceTimer {
    #[must_use]
    pub fn new() -> Self {
        let (deadline, _) = watch::channel(None);
        Self { deadline }
    }

    /// Arm (or re-arm) the timer to fire `delay` from now.
    pub fn arm(&self, delay: Duration) -> Instant {
        let deadline = Instant::now() + delay;
        self.deadline.send_replace(Some(deadline));
        deadline
    }

    /// The pending deadline, if armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.borrow()
    }

    /// Wait until an armed deadline passes, then disarm and return it.
    ///
    /// A deadline replaced while waiting is never reported.
    pub async fn expired(&self) -> Instant {
        let mut rx = self.deadline.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            let Some(deadline) = current else {
                // the sender lives in `self`, so this only returns on a change
                let _ = rx.changed().await;
                continue;
            };

            tokio::select! {
                () = tokio::time::sleep_until(deadline) => {
                    let fired = self.deadline.send_if_modified(|pending| {
                        if *pending == Some(deadline) {
                            *pending = None;
                            true
                        } else {
                            false
                        }
                    });
                    if fired {
                        return deadline;
                    }
                }
                _ = rx.changed() => {}
            }
        }
    }
}
