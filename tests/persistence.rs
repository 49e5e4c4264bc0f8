// ABOUTME: Integration tests for snapshot persistence and recovery after a restart.
// ABOUTME: Restarts are simulated by opening a second lifecycle on a copy of the snapshot.

mod support;

use kahua::batch::BatchState;
use kahua::exec::{CommandTemplate, Connector};
use kahua::hosts::{CommandDeployer, HostAllocationPool, HostTarget, PoolSettings, PoolState};
use kahua::lifecycle::{ManagerState, NoHooks, NodeLifecycle, NodePhase};
use kahua::state::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, read_snapshot};
use kahua::types::{NodeName, RegisteredNode};
use std::sync::Arc;
use std::time::Duration;
use support::{Script, ScriptedRunner, settle};

fn node(name: &str) -> RegisteredNode {
    RegisteredNode::new(NodeName::new(name).unwrap(), format!("pnp://{name}"))
}

/// Copy of `store` as it is now, standing in for the file a crashed manager left.
fn frozen(store: &MemorySnapshotStore, source: &str) -> Arc<dyn SnapshotStore> {
    let copy = MemorySnapshotStore::new();
    let blob = store.load(source).unwrap().unwrap();
    copy.store(source, &blob).unwrap();
    Arc::new(copy)
}

/// Test: Every transition is mirrored to the snapshot store.
#[tokio::test]
async fn transitions_are_persisted() {
    support::init_tracing();
    let store = Arc::new(MemorySnapshotStore::new());
    let lifecycle =
        NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(store.clone())).unwrap();
    assert!(!lifecycle.recovered());
    assert!(lifecycle.status().persistent);

    lifecycle
        .add_deploying_node("n1", "start n1", "Deploying", Duration::from_secs(60))
        .unwrap();
    let lost = lifecycle
        .add_deploying_node("n2", "start n2", "Deploying", Duration::from_secs(60))
        .unwrap();
    lifecycle
        .add_deploying_node("n3", "start n3", "Deploying", Duration::from_secs(60))
        .unwrap();
    lifecycle.declare_deploying_node_lost(&lost, "exited");
    lifecycle.register_acquired_node(&node("n3")).unwrap();

    let snapshot = read_snapshot::<ManagerState<BatchState>>(&*store, "src")
        .unwrap()
        .unwrap();
    let counts = snapshot.state.nodes().counts();
    assert_eq!((counts.deploying, counts.lost, counts.acquired), (1, 1, 1));
    assert_eq!(snapshot.meta.pid, std::process::id());
}

/// Test: A restarted lifecycle resumes its records and re-arms pending deadlines.
#[tokio::test(start_paused = true)]
async fn restart_resumes_deadlines() {
    support::init_tracing();
    let store = Arc::new(MemorySnapshotStore::new());
    let first =
        NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(store.clone())).unwrap();
    let url = first
        .add_deploying_node("n1", "start n1", "Deploying", Duration::from_secs(60))
        .unwrap();
    first
        .add_deploying_node("n2", "start n2", "Deploying", Duration::from_secs(60))
        .unwrap();
    first.register_acquired_node(&node("n2")).unwrap();
    let left_behind = frozen(&store, "src");
    first.shutdown().await;

    let second =
        NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(left_behind)).unwrap();
    assert!(second.recovered());
    assert_eq!(second.phase(&url), NodePhase::Deploying);
    assert!(second.is_acquired(&NodeName::new("n2").unwrap()));

    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    assert_eq!(second.phase(&url), NodePhase::Lost);
    assert_eq!(
        second.deploying_node(&url).unwrap().description,
        "Timeout occurred after 60000 ms."
    );
}

/// Test: A recovered pool keeps its registered nodes and frees hosts whose
/// attempt died with the previous process.
#[tokio::test(start_paused = true)]
async fn recovered_pool_reclaims_abandoned_hosts() {
    support::init_tracing();
    let runner = ScriptedRunner::new(Script::Hang);
    let store = Arc::new(MemorySnapshotStore::new());
    let hosts = [HostTarget::new("h1.example", 1), HostTarget::new("h2.example", 1)];
    let open = |snapshots: Arc<dyn SnapshotStore>| {
        let deployer = CommandDeployer::new(
            Connector::Runner(runner.clone()),
            CommandTemplate::parse("start {node}").unwrap(),
            "pnp://manager:64738",
        )
        .with_poll_interval(Duration::from_millis(100));
        HostAllocationPool::open(
            "rack1",
            &hosts,
            deployer,
            PoolSettings::default(),
            Some(snapshots),
        )
        .unwrap()
    };

    let first = open(store.clone());
    assert_eq!(first.acquire_all_nodes(), 2);
    settle().await;
    first
        .lifecycle()
        .register_acquired_node(&node("rack1__h1_example__0").with_host("h1.example"))
        .unwrap();

    let second = open(frozen(&store, "rack1"));
    first.shutdown().await;

    assert!(second.lifecycle().recovered());
    assert_eq!(
        second.lifecycle().acquired_nodes(),
        vec![NodeName::new("rack1__h1_example__0").unwrap()]
    );
    let state: PoolState = second.state();
    assert_eq!(state.free_hosts().get("h2.example"), Some(&1));
    assert!(state.free_hosts().get("h1.example").is_none());
    assert_eq!(state.host("h1.example").unwrap().alive_count(), 1);

    second.shutdown().await;
}

/// Test: The file store survives a process boundary through JSON on disk.
#[tokio::test]
async fn file_store_round_trip() {
    support::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path()));

    let first =
        NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(store.clone())).unwrap();
    first
        .add_deploying_node("n1", "start n1", "Deploying", Duration::from_secs(600))
        .unwrap();
    assert!(dir.path().join("src.json").exists());

    let second = NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(store)).unwrap();
    assert!(second.recovered());
    assert_eq!(second.deploying_nodes().len(), 1);
    assert_eq!(second.deploying_nodes()[0].command, "start n1");
}

/// Test: A corrupt snapshot refuses to open instead of starting empty.
#[tokio::test]
async fn corrupt_snapshot_is_an_error() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.store("src", b"{not json").unwrap();

    let err = NodeLifecycle::<BatchState>::open("src", Arc::new(NoHooks), Some(store)).unwrap_err();
    assert_eq!(err.kind(), kahua::lifecycle::LifecycleErrorKind::State);
}
