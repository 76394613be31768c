//! The session map and its narrow API.

use crate::channel::SessionChannel;
use crate::error::RegistryError;
use crate::subscription::Subscription;
use crossbeam::channel::{self, Receiver};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tpmsync_core::{LearnRule, Topology, TpmSettings};
use tpmsync_types::{StateSnapshot, Token};
use tracing::{debug, info};

/// Registry tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Snapshot buffer per session.
    pub channel_capacity: usize,
    /// How long a publish may wait on a full buffer before dropping.
    pub publish_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10,
            publish_timeout: Duration::from_millis(50),
        }
    }
}

/// Whether a session currently has a live subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Idle,
    Subscribed,
}

struct OpenSession {
    settings: Arc<TpmSettings>,
    start_time: SystemTime,
    max_repetitions: u64,
    completed_repetitions: u64,
    subscription: SubscriptionState,
    armed: Arc<AtomicBool>,
    rx: Receiver<StateSnapshot>,
}

/// Serializable view of one open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub token: Token,
    pub topology: Topology,
    pub learn_rule: LearnRule,
    pub k: Vec<usize>,
    pub n: Vec<usize>,
    pub l: i32,
    pub m: i32,
    pub start_time_ms: u64,
    pub max_repetitions: u64,
    pub completed_repetitions: u64,
    pub tracking: bool,
}

impl SessionSnapshot {
    fn new(token: Token, session: &OpenSession) -> Self {
        let settings = &session.settings;
        let start_time_ms = session
            .start_time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            token,
            topology: settings.topology(),
            learn_rule: settings.learn_rule(),
            k: settings.k().to_vec(),
            n: settings.n().to_vec(),
            l: settings.l(),
            m: settings.m(),
            start_time_ms,
            max_repetitions: session.max_repetitions,
            completed_repetitions: session.completed_repetitions,
            tracking: session.subscription == SubscriptionState::Subscribed,
        }
    }
}

pub(crate) struct Inner {
    sessions: RwLock<HashMap<Token, OpenSession>>,
    config: RegistryConfig,
}

/// Concurrent map of open trial groups.
///
/// Cheap to clone; clones share the same map. Every operation holds the lock
/// only for the map access itself.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Open a session and return the publisher its trials report through.
    pub fn register(
        &self,
        token: Token,
        settings: Arc<TpmSettings>,
        start_time: SystemTime,
        max_repetitions: u64,
    ) -> Result<Arc<SessionChannel>, RegistryError> {
        let (tx, rx) = channel::bounded(self.inner.config.channel_capacity.max(1));
        let armed = Arc::new(AtomicBool::new(false));
        let publisher = Arc::new(SessionChannel::new(
            token,
            tx,
            Arc::clone(&armed),
            self.inner.config.publish_timeout,
        ));

        let open = {
            let mut sessions = self.inner.write();
            if sessions.contains_key(&token) {
                return Err(RegistryError::Duplicate(token));
            }
            sessions.insert(
                token,
                OpenSession {
                    settings: Arc::clone(&settings),
                    start_time,
                    max_repetitions,
                    completed_repetitions: 0,
                    subscription: SubscriptionState::Idle,
                    armed,
                    rx,
                },
            );
            sessions.len()
        };

        tpmsync_metrics::set_open_sessions(open);
        info!(
            token = %token,
            topology = %settings.topology(),
            learn_rule = %settings.learn_rule(),
            k = ?settings.k(),
            n = ?settings.n(),
            l = settings.l(),
            m = settings.m(),
            max_repetitions,
            "Session opened"
        );
        Ok(publisher)
    }

    /// Count one finished repetition; returns the new total.
    pub fn record_repetition(&self, token: &Token) -> Result<u64, RegistryError> {
        let mut sessions = self.inner.write();
        let session = sessions
            .get_mut(token)
            .ok_or(RegistryError::NotFound(*token))?;
        session.completed_repetitions += 1;
        Ok(session.completed_repetitions)
    }

    /// Close a session. Returns whether it was open.
    ///
    /// The snapshot stream ends once the trial group also drops its
    /// [`SessionChannel`].
    pub fn remove(&self, token: &Token) -> bool {
        let (removed, open) = {
            let mut sessions = self.inner.write();
            let removed = sessions.remove(token);
            (removed, sessions.len())
        };
        match removed {
            Some(session) => {
                session.armed.store(false, Ordering::Release);
                tpmsync_metrics::set_open_sessions(open);
                info!(
                    token = %token,
                    completed_repetitions = session.completed_repetitions,
                    "Session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Every open session, oldest first.
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<_> = self
            .inner
            .read()
            .iter()
            .map(|(token, session)| SessionSnapshot::new(*token, session))
            .collect();
        list.sort_by(|a, b| {
            a.start_time_ms
                .cmp(&b.start_time_ms)
                .then_with(|| a.token.cmp(&b.token))
        });
        list
    }

    pub fn session(&self, token: &Token) -> Result<SessionSnapshot, RegistryError> {
        self.inner
            .read()
            .get(token)
            .map(|session| SessionSnapshot::new(*token, session))
            .ok_or(RegistryError::NotFound(*token))
    }

    /// Settings of an open session.
    pub fn session_config(&self, token: &Token) -> Result<Arc<TpmSettings>, RegistryError> {
        self.inner
            .read()
            .get(token)
            .map(|session| Arc::clone(&session.settings))
            .ok_or(RegistryError::NotFound(*token))
    }

    /// Start following a session's trials.
    ///
    /// Fails with `AlreadySubscribed` while another subscription is alive.
    pub fn subscribe(&self, token: &Token) -> Result<Subscription, RegistryError> {
        let rx = {
            let mut sessions = self.inner.write();
            let session = sessions
                .get_mut(token)
                .ok_or(RegistryError::NotFound(*token))?;
            if session.subscription == SubscriptionState::Subscribed {
                return Err(RegistryError::AlreadySubscribed(*token));
            }
            // Leftovers from a previous subscriber.
            while session.rx.try_recv().is_ok() {}
            session.subscription = SubscriptionState::Subscribed;
            session.armed.store(true, Ordering::Release);
            session.rx.clone()
        };

        debug!(token = %token, "Subscriber attached");
        Ok(Subscription::new(*token, rx, Arc::clone(&self.inner)))
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Inner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Token, OpenSession>> {
        self.sessions.read().expect("session registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Token, OpenSession>> {
        self.sessions
            .write()
            .expect("session registry lock poisoned")
    }

    /// Return a session to `Idle` after its subscriber went away.
    pub(crate) fn release_subscription(&self, token: &Token) {
        let mut sessions = self.write();
        if let Some(session) = sessions.get_mut(token) {
            session.armed.store(false, Ordering::Release);
            session.subscription = SubscriptionState::Idle;
        }
    }
}
