//! Publisher half of a session's state stream.

use crossbeam::channel::{SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tpmsync_core::TrialObserver;
use tpmsync_types::{StateSnapshot, Token};
use tracing::trace;

/// The only sender of a session's snapshot channel.
///
/// Handed to the trial group when it registers. Dropping the last clone
/// disconnects the channel, which ends any live [`Subscription`].
///
/// [`Subscription`]: crate::Subscription
#[derive(Debug)]
pub struct SessionChannel {
    token: Token,
    tx: Sender<StateSnapshot>,
    armed: Arc<AtomicBool>,
    publish_timeout: Duration,
}

impl SessionChannel {
    pub(crate) fn new(
        token: Token,
        tx: Sender<StateSnapshot>,
        armed: Arc<AtomicBool>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            token,
            tx,
            armed,
            publish_timeout,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }
}

impl TrialObserver for SessionChannel {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn publish(&self, snapshot: StateSnapshot) {
        match self.tx.send_timeout(snapshot, self.publish_timeout) {
            Ok(()) => tpmsync_metrics::record_snapshot_published(),
            Err(SendTimeoutError::Timeout(_)) => {
                trace!(token = %self.token, "Subscriber lagging, snapshot dropped");
                tpmsync_metrics::record_snapshot_dropped();
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                trace!(token = %self.token, "Snapshot channel closed");
            }
        }
    }
}
