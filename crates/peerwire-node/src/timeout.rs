//! Inactivity timer -- one watchdog per channel.
//!
//! The deadline lives in a `watch` cell. Arming replaces it; the watchdog
//! task sleeps until the current deadline and re-sleeps whenever the cell
//! changes. Only a sleep that completes against an unchanged deadline is an
//! expiry. Cancellation wakes the watchdog through its token and it returns
//! without a teardown request.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelId, DisconnectReason};
use crate::gateway::TeardownHandle;

#[derive(Debug)]
pub struct InactivityTimer {
    duration: Duration,
    deadline: watch::Sender<Instant>,
    cancel: CancellationToken,
}

impl InactivityTimer {
    /// Arm a timer for channel `id` and spawn its watchdog. The watchdog
    /// stops when `parent` is cancelled or when [`cancel`](Self::cancel) runs.
    pub fn start(
        id: ChannelId,
        duration: Duration,
        teardown: TeardownHandle,
        parent: &CancellationToken,
    ) -> Self {
        let (deadline, rx) = watch::channel(Instant::now() + duration);
        let cancel = parent.child_token();
        tokio::spawn(watch_deadline(id, duration, rx, teardown, cancel.clone()));
        Self {
            duration,
            deadline,
            cancel,
        }
    }

    /// Push the deadline to now + duration.
    pub fn arm(&self) {
        self.deadline.send_replace(Instant::now() + self.duration);
    }

    /// Stop the watchdog. A pending expiry is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.borrow()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Drop for InactivityTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_deadline(
    id: ChannelId,
    duration: Duration,
    mut deadline: watch::Receiver<Instant>,
    teardown: TeardownHandle,
    cancel: CancellationToken,
) {
    loop {
        let current = *deadline.borrow_and_update();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = tokio::time::sleep_until(current) => {
                tracing::warn!(channel = %id, secs = duration.as_secs(), "inactivity timeout");
                teardown.request(id, DisconnectReason::Timeout(duration));
                return;
            }
        }
    }
}
