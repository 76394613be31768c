//! Registry of in-flight trial groups and their live state streams.
//!
//! A trial group registers itself when it starts and removes itself when it
//! ends. In between, anyone holding a [`SessionRegistry`] can:
//!
//! - list open groups ([`SessionRegistry::list_sessions`])
//! - look up a group's settings ([`SessionRegistry::session_config`])
//! - follow its trials live ([`SessionRegistry::subscribe`])
//!
//! # Subscription lifecycle
//!
//! ```text
//!            subscribe()                 drop(Subscription)
//!   Idle ───────────────────► Subscribed ───────────────────► Idle
//!     ▲   arms publisher                   disarms publisher   │
//!     └────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one subscriber per group. While idle the engine skips snapshot
//! construction entirely.

mod channel;
mod error;
mod registry;
mod subscription;

pub use channel::SessionChannel;
pub use error::RegistryError;
pub use registry::{RegistryConfig, SessionRegistry, SessionSnapshot, SubscriptionState};
pub use subscription::Subscription;
