//! A real trial streaming into a subscriber on another thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tpmsync_core::{EngineConfig, SyncEngine, TpmSettings};
use tpmsync_registry::{RegistryConfig, SessionRegistry};
use tpmsync_types::{SessionStatus, SnapshotKind, Token};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_subscriber_follows_trial_to_completion() {
    let registry = SessionRegistry::new(RegistryConfig {
        channel_capacity: 10,
        publish_timeout: Duration::from_secs(5),
    });
    let settings =
        Arc::new(TpmSettings::build(&[3], 2, 2, 1, "FULLY_CONNECTED", "HEBBIAN").unwrap());
    let token = Token::from_parts(&[settings.fingerprint().as_bytes(), b"live".as_slice()]);
    let publisher = registry
        .register(token, Arc::clone(&settings), SystemTime::now(), 1)
        .unwrap();

    let subscription = registry.subscribe(&token).unwrap();
    let reader = thread::spawn(move || subscription.collect::<Vec<_>>());

    let engine = SyncEngine::new(
        settings,
        EngineConfig {
            max_iterations: 10_000,
            publish_settle: 0,
            publish_every: 1,
        },
    );
    let result = engine.run(42, Some(&*publisher));
    registry.record_repetition(&token).unwrap();
    registry.remove(&token);
    drop(publisher);

    let snapshots = reader.join().unwrap();
    assert_eq!(result.status, SessionStatus::Finished);
    assert_eq!(snapshots.len() as u64, result.total_iterations + 1);
    let last = snapshots.last().unwrap();
    assert_eq!(last.kind, SnapshotKind::Finished);
    assert_eq!(last.weights, result.final_weights);
    assert!(registry.is_empty());
}

#[traced_test]
#[test]
fn test_idle_session_publishes_nothing() {
    let registry = SessionRegistry::default();
    let settings =
        Arc::new(TpmSettings::build(&[3], 2, 2, 1, "FULLY_CONNECTED", "ANTI_HEBBIAN").unwrap());
    let token = Token::from_parts(&[b"idle".as_slice()]);
    let publisher = registry
        .register(token, Arc::clone(&settings), SystemTime::now(), 1)
        .unwrap();

    let engine = SyncEngine::new(
        settings,
        EngineConfig {
            max_iterations: 500,
            publish_settle: 0,
            publish_every: 1,
        },
    );
    let result = engine.run(7, Some(&*publisher));
    assert!(result.total_iterations > 0);

    // Anything the idle run had published would still be buffered.
    let subscription = registry.subscribe(&token).unwrap();
    assert!(subscription.try_recv().is_none());
}
