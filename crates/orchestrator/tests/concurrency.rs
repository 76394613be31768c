//! Sweeps and on-demand groups against real and manual dispatchers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};
use tpmsync_core::{Topology, TpmSettings};
use tpmsync_dispatch::Dispatch;
use tpmsync_dispatch_pooled::{PooledDispatch, WorkerPoolConfig};
use tpmsync_dispatch_sync::SyncDispatch;
use tpmsync_orchestrator::{
    MemorySink, OnDemandRequest, Orchestrator, OrchestratorConfig, OrchestratorError,
    ResultSink, SimulationSettings, SinkError, SystemClock,
};
use tpmsync_registry::{RegistryConfig, SessionRegistry};
use tpmsync_types::{SessionResult, SnapshotKind};
use tracing_test::traced_test;

const SWEEP: &str = r#"{
    "tpm_type": "FULLY_CONNECTED",
    "max_session_count": 2,
    "max_iterations": 5000,
    "max_worker_count": 2,
    "learn_rules": ["HEBBIAN", "ANTI_HEBBIAN", "RANDOM_WALK"],
    "l_configs": [2],
    "m_configs": [1],
    "k_configs": [[3], [4]],
    "n0_configs": [2]
}"#;

/// Counts records and keeps each group busy long enough to overlap.
#[derive(Default)]
struct SlowSink {
    records: AtomicUsize,
}

impl ResultSink for SlowSink {
    fn record(
        &self,
        _settings: &TpmSettings,
        _result: &SessionResult,
        _start: SystemTime,
        _end: SystemTime,
    ) -> Result<(), SinkError> {
        thread::sleep(Duration::from_millis(5));
        self.records.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracks how many trial groups are running at once.
#[derive(Clone)]
struct CountingDispatch<D> {
    inner: D,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    groups: Arc<AtomicUsize>,
}

impl<D> CountingDispatch<D> {
    fn new(inner: D) -> Self {
        Self {
            inner,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            groups: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<D: Dispatch> Dispatch for CountingDispatch<D> {
    fn spawn_trial_group(&self, f: impl FnOnce() + Send + 'static) {
        let running = self.running.clone();
        let peak = self.peak.clone();
        let groups = self.groups.clone();
        self.inner.spawn_trial_group(move || {
            groups.fetch_add(1, Ordering::SeqCst);
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            f();
            running.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn queue_depth(&self) -> usize {
        self.inner.queue_depth()
    }

    fn active_workers(&self) -> usize {
        self.inner.active_workers()
    }

    fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }
}

/// Fails every write.
struct BrokenSink;

impl ResultSink for BrokenSink {
    fn record(
        &self,
        _settings: &TpmSettings,
        _result: &SessionResult,
        _start: SystemTime,
        _end: SystemTime,
    ) -> Result<(), SinkError> {
        Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Holds groups until the test releases them.
#[derive(Clone, Default)]
struct ManualDispatch {
    queue: Arc<Mutex<Vec<Job>>>,
}

impl ManualDispatch {
    fn run_all(&self) {
        let jobs: Vec<Job> = std::mem::take(&mut *self.queue.lock().unwrap());
        for job in jobs {
            job();
        }
    }
}

impl Dispatch for ManualDispatch {
    fn spawn_trial_group(&self, f: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push(Box::new(f));
    }

    fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn active_workers(&self) -> usize {
        0
    }

    fn worker_count(&self) -> usize {
        1
    }
}

fn orchestrator<D: Dispatch>(
    dispatch: D,
    sink: Arc<dyn ResultSink>,
    config: OrchestratorConfig,
) -> Orchestrator<D> {
    Orchestrator::new(
        dispatch,
        SessionRegistry::new(RegistryConfig {
            channel_capacity: 10,
            publish_timeout: Duration::from_secs(5),
        }),
        sink,
        Arc::new(SystemClock),
        config,
    )
}

#[traced_test]
#[test]
fn test_pool_bound_holds_and_registry_drains() {
    let sweep = SimulationSettings::from_json_str(SWEEP).unwrap();
    let workers = sweep.base().max_worker_count;
    let dispatch =
        CountingDispatch::new(PooledDispatch::new(WorkerPoolConfig::with_workers(workers)).unwrap());
    let sink = Arc::new(SlowSink::default());
    let orch = orchestrator(dispatch.clone(), sink.clone(), OrchestratorConfig::default());

    let report = orch.run_sweep(&sweep).unwrap();

    assert_eq!(report.submitted, 6);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.completed, 6);
    assert_eq!(sink.records.load(Ordering::SeqCst), 12);
    assert_eq!(dispatch.groups.load(Ordering::SeqCst), 6);
    let peak = dispatch.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= workers, "peak {peak} with {workers} workers");
    assert!(orch.registry().is_empty());
}

#[traced_test]
#[test]
fn test_infeasible_combinations_are_skipped() {
    let json = SWEEP
        .replace("FULLY_CONNECTED", "PARTIALLY_CONNECTED")
        .replace("[[3], [4]]", "[[3, 5], [4, 2]]")
        .replace("\"RANDOM_WALK\"", "\"OJA\"");
    let sweep = SimulationSettings::from_json_str(&json).unwrap();
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(SyncDispatch::new(), sink.clone(), OrchestratorConfig::default());

    let report = orch.run_sweep(&sweep).unwrap();

    // [3, 5] never shrinks and OJA is not a rule; only {HEBBIAN, ANTI_HEBBIAN} × [4, 2] run.
    assert_eq!(report.submitted, 2);
    assert_eq!(report.skipped, 4);
    assert_eq!(report.completed, 2);
    assert_eq!(sink.len(), 4);
    assert!(sink.records().iter().all(|r| r.k == vec![4, 2]));
}

#[traced_test]
#[test]
fn test_sink_failures_do_not_abort_group() {
    let sweep = SimulationSettings::from_json_str(SWEEP).unwrap();
    let orch = orchestrator(
        SyncDispatch::new(),
        Arc::new(BrokenSink),
        OrchestratorConfig::default(),
    );
    let report = orch.run_sweep(&sweep).unwrap();
    assert_eq!(report.completed, report.submitted);
    assert!(orch.registry().is_empty());
}

#[test]
fn test_invalid_document_rejected() {
    let mut sweep = SimulationSettings::from_json_str(SWEEP).unwrap();
    sweep.base_mut().m_configs.clear();
    let orch = orchestrator(
        SyncDispatch::new(),
        Arc::new(MemorySink::new()),
        OrchestratorConfig::default(),
    );
    assert!(matches!(
        orch.run_sweep(&sweep),
        Err(OrchestratorError::Config(_))
    ));
}

#[traced_test]
#[test]
fn test_on_demand_is_listed_until_it_finishes() {
    let dispatch = ManualDispatch::default();
    let sink = Arc::new(MemorySink::new());
    let orch = orchestrator(dispatch.clone(), sink.clone(), OrchestratorConfig::default());

    let request = OnDemandRequest::non_overlapped("HEBBIAN", vec![2, 2], 2, 2, 1)
        .with_repetitions(3)
        .with_max_iterations(2000);
    let token = orch.submit_on_demand(request).unwrap();

    let listed = orch.registry().list_sessions();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].token, token);
    assert_eq!(listed[0].topology, Topology::NoOverlap);
    assert_eq!(listed[0].completed_repetitions, 0);
    let settings = orch.registry().session_config(&token).unwrap();
    assert_eq!(settings.k(), &[4, 2]);

    dispatch.run_all();

    assert!(orch.registry().is_empty());
    assert_eq!(sink.len(), 3);
    assert!(sink.records().iter().all(|r| r.tpm_type == "NO_OVERLAP"));
}

#[test]
fn test_on_demand_rejects_bad_requests() {
    let orch = orchestrator(
        ManualDispatch::default(),
        Arc::new(MemorySink::new()),
        OrchestratorConfig::default(),
    );

    let infeasible =
        OnDemandRequest::overlapped(Topology::PartiallyConnected, "HEBBIAN", vec![2, 3], 4, 2, 1);
    assert!(matches!(
        orch.submit_on_demand(infeasible),
        Err(OrchestratorError::Settings(_))
    ));

    let bad_rule = OnDemandRequest::overlapped(Topology::FullyConnected, "OJA", vec![3], 4, 2, 1);
    assert!(matches!(
        orch.submit_on_demand(bad_rule),
        Err(OrchestratorError::Settings(_))
    ));

    let no_reps = OnDemandRequest::overlapped(Topology::FullyConnected, "HEBBIAN", vec![3], 4, 2, 1)
        .with_repetitions(0);
    assert!(matches!(
        orch.submit_on_demand(no_reps),
        Err(OrchestratorError::InvalidRequest(_))
    ));

    assert!(orch.registry().is_empty());
}

#[test]
fn test_on_demand_backpressure() {
    let dispatch = ManualDispatch::default();
    let orch = orchestrator(
        dispatch.clone(),
        Arc::new(MemorySink::new()),
        OrchestratorConfig {
            max_queued_on_demand: 0,
            ..OrchestratorConfig::default()
        },
    );
    let request = || OnDemandRequest::overlapped(Topology::FullyConnected, "HEBBIAN", vec![3], 2, 2, 1);

    orch.submit_on_demand(request()).unwrap();
    assert!(matches!(
        orch.submit_on_demand(request()),
        Err(OrchestratorError::Overloaded { queue_depth: 1 })
    ));
    // The refused group is not left behind in the registry.
    assert_eq!(orch.registry().len(), 1);

    dispatch.run_all();
    assert!(orch.registry().is_empty());
}

#[traced_test]
#[test]
fn test_subscriber_sees_every_repetition_finish() {
    let dispatch = ManualDispatch::default();
    let orch = orchestrator(
        dispatch.clone(),
        Arc::new(MemorySink::new()),
        OrchestratorConfig {
            publish_settle: 0,
            publish_every: 50,
            ..OrchestratorConfig::default()
        },
    );
    let request = OnDemandRequest::overlapped(Topology::FullyConnected, "HEBBIAN", vec![3], 2, 2, 1)
        .with_repetitions(2)
        .with_max_iterations(10_000);
    let token = orch.submit_on_demand(request).unwrap();
    let subscription = orch.registry().subscribe(&token).unwrap();
    assert!(orch.registry().session(&token).unwrap().tracking);

    let reader = thread::spawn(move || subscription.collect::<Vec<_>>());
    dispatch.run_all();
    let snapshots = reader.join().unwrap();

    let finished: Vec<_> = snapshots
        .iter()
        .filter(|s| s.kind == SnapshotKind::Finished)
        .collect();
    assert_eq!(finished.len(), 2);
    assert_eq!(snapshots.last().unwrap().kind, SnapshotKind::Finished);
    assert_ne!(finished[0].seed, finished[1].seed);
}
