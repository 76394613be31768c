//! Subscriber half of a session's state stream.

use crate::registry::Inner;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tpmsync_types::{StateSnapshot, Token};
use tracing::debug;

/// A live view of one session's trials.
///
/// Yields snapshots until the session ends. Dropping it returns the session
/// to idle so another subscriber may attach.
pub struct Subscription {
    token: Token,
    rx: Receiver<StateSnapshot>,
    registry: Arc<Inner>,
}

impl Subscription {
    pub(crate) fn new(token: Token, rx: Receiver<StateSnapshot>, registry: Arc<Inner>) -> Self {
        Self {
            token,
            rx,
            registry,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Block for the next snapshot. `None` once the session has ended.
    pub fn recv(&self) -> Option<StateSnapshot> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<StateSnapshot, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<StateSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Iterator for Subscription {
    type Item = StateSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.release_subscription(&self.token);
        debug!(token = %self.token, "Subscriber detached");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("buffered", &self.rx.len())
            .finish()
    }
}
