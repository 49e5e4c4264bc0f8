// ABOUTME: Integration tests for the node lifecycle controller and its timeout supervisor.
// ABOUTME: Covers deadlines, registration, loss, removal, rejection, shutdown, and events.

mod support;

use kahua::diagnostics::WarningKind;
use kahua::lifecycle::{
    LifecycleError, LifecycleErrorKind, LifecycleHooks, NoHooks, NodeEventKind, NodeLifecycle,
    NodePhase, RejectionError, SHUTDOWN_DESCRIPTION,
};
use kahua::types::{DeployingNodeUrl, NodeName, RegisteredNode};
use std::cell::Cell;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use support::settle;

fn lifecycle() -> Arc<NodeLifecycle<()>> {
    support::init_tracing();
    NodeLifecycle::<()>::new("rack1", Arc::new(NoHooks)).unwrap()
}

fn node(name: &str) -> RegisteredNode {
    RegisteredNode::new(NodeName::new(name).unwrap(), format!("pnp://{name}:64738"))
}

fn add(lifecycle: &NodeLifecycle<()>, name: &str, timeout_ms: u64) -> DeployingNodeUrl {
    lifecycle
        .add_deploying_node(
            name,
            &format!("start-node {name}"),
            "Deploying",
            Duration::from_millis(timeout_ms),
        )
        .unwrap()
}

/// Counts lost notifications and refuses nodes whose name starts with "bad".
#[derive(Default)]
struct Recording {
    lost: AtomicUsize,
}

impl LifecycleHooks<()> for Recording {
    fn on_acquired_node(&self, _: &mut (), node: &RegisteredNode) -> Result<(), RejectionError> {
        if node.name.as_str().starts_with("bad") {
            return Err(RejectionError::new("not on the allow list"));
        }
        Ok(())
    }

    fn on_deploying_node_lost(&self, _: &mut (), _: &DeployingNodeUrl) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Deadlines
// =============================================================================

/// Test: A node that never registers is lost after its timeout, and the
/// acquired check then runs the not-found callback.
#[tokio::test(start_paused = true)]
async fn unregistered_node_is_lost_after_timeout() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 1000);
    assert_eq!(url.as_str(), "deploying://rack1/n1");
    assert!(lifecycle.is_deploying(&url));

    tokio::time::sleep(Duration::from_millis(999)).await;
    settle().await;
    assert!(lifecycle.is_deploying(&url), "deadline fired early");

    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;

    assert!(lifecycle.is_lost(&url));
    assert!(!lifecycle.is_deploying(&url));
    let record = lifecycle.deploying_node(&url).unwrap();
    assert!(record.lost);
    assert_eq!(record.description, "Timeout occurred after 1000 ms.");

    let found_ran = Cell::new(false);
    let not_found_ran = Cell::new(false);
    let found = lifecycle.check_node_is_acquired_and_do(
        &NodeName::new("n1").unwrap(),
        |_| {
            found_ran.set(true);
            Ok::<(), Infallible>(())
        },
        |_| {
            not_found_ran.set(true);
            Ok(())
        },
    );
    assert!(!found);
    assert!(!found_ran.get());
    assert!(not_found_ran.get());
}

/// Test: A node registered before its deadline is never declared lost.
#[tokio::test(start_paused = true)]
async fn registered_node_ignores_its_deadline() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 1000);

    lifecycle.register_acquired_node(&node("n1")).unwrap();
    assert_eq!(lifecycle.phase(&url), NodePhase::Acquired);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(lifecycle.phase(&url), NodePhase::Acquired);
    assert!(lifecycle.lost_nodes().is_empty());
}

/// Test: Declaring a node lost is idempotent and the deadline never rewrites it.
#[tokio::test(start_paused = true)]
async fn declare_lost_is_idempotent() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 1000);

    assert!(lifecycle.declare_deploying_node_lost(&url, "process exited"));
    assert!(!lifecycle.declare_deploying_node_lost(&url, "again"));

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    let lost = lifecycle.lost_nodes();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].description, "process exited");
}

/// Test: A removed deploying node is not resurrected by its deadline.
#[tokio::test(start_paused = true)]
async fn removed_node_is_forgotten() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 1000);

    assert!(lifecycle.remove_deploying_node(&url));
    assert!(!lifecycle.remove_deploying_node(&url));

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    assert_eq!(lifecycle.phase(&url), NodePhase::Unknown);
    assert!(lifecycle.lost_nodes().is_empty());
}

// =============================================================================
// Registration
// =============================================================================

/// Test: A late registration after loss is refused as unexpected.
#[tokio::test(start_paused = true)]
async fn late_registration_is_unexpected() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 1000);
    lifecycle.declare_deploying_node_lost(&url, "gave up");

    let err = lifecycle.register_acquired_node(&node("n1")).unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::UnexpectedNode);
    assert!(!lifecycle.is_acquired(&NodeName::new("n1").unwrap()));
}

/// Test: Without any deploying record in use, nodes are accepted directly.
#[tokio::test]
async fn sources_without_deploying_records_accept_any_node() {
    let lifecycle = lifecycle();
    assert!(!lifecycle.nodes().uses_deploying_nodes());

    lifecycle.register_acquired_node(&node("static1")).unwrap();
    assert_eq!(lifecycle.acquired_nodes(), vec![NodeName::new("static1").unwrap()]);
}

/// Test: Once deploying records are in use, strangers are refused.
#[tokio::test]
async fn stranger_is_refused_once_deploying_records_are_used() {
    let lifecycle = lifecycle();
    add(&lifecycle, "n1", 60_000);

    let err = lifecycle.register_acquired_node(&node("n2")).unwrap_err();
    assert!(matches!(err, LifecycleError::UnexpectedNode(name) if name == "n2"));
}

/// Test: A node refused by the admission hook ends up lost.
#[tokio::test]
async fn rejected_node_is_moved_to_lost() {
    support::init_tracing();
    let hooks = Arc::new(Recording::default());
    let lifecycle = NodeLifecycle::<()>::new("rack1", hooks.clone()).unwrap();
    let url = lifecycle
        .add_deploying_node("bad1", "start", "Deploying", Duration::from_secs(60))
        .unwrap();

    let err = lifecycle.register_acquired_node(&node("bad1")).unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::Rejected);
    assert!(lifecycle.is_lost(&url));
    assert!(
        lifecycle
            .deploying_node(&url)
            .unwrap()
            .description
            .contains("not on the allow list")
    );
    assert_eq!(hooks.lost.load(Ordering::SeqCst), 1);
}

/// Test: Removing a record that was still deploying notifies the lost hook.
#[tokio::test]
async fn removing_a_deploying_record_notifies_the_backend() {
    let hooks = Arc::new(Recording::default());
    let lifecycle = NodeLifecycle::<()>::new("rack1", hooks.clone()).unwrap();
    let deploying = lifecycle
        .add_deploying_node("n1", "start", "Deploying", Duration::from_secs(60))
        .unwrap();
    let lost = lifecycle
        .add_deploying_node("n2", "start", "Deploying", Duration::from_secs(60))
        .unwrap();
    lifecycle.declare_deploying_node_lost(&lost, "exited");
    assert_eq!(hooks.lost.load(Ordering::SeqCst), 1);

    lifecycle.remove_deploying_node(&lost);
    assert_eq!(hooks.lost.load(Ordering::SeqCst), 1);

    lifecycle.remove_deploying_node(&deploying);
    assert_eq!(hooks.lost.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Validation
// =============================================================================

/// Test: Names are unique across deploying, lost, and acquired nodes.
#[tokio::test]
async fn duplicate_names_are_refused() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 60_000);

    let err = lifecycle
        .add_deploying_node("n1", "start", "again", Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::DuplicateName);

    lifecycle.declare_deploying_node_lost(&url, "exited");
    assert!(
        lifecycle
            .add_deploying_node("n1", "start", "again", Duration::from_secs(1))
            .is_err()
    );

    let err = lifecycle
        .add_deploying_node("has space", "start", "x", Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::DuplicateName);
}

/// Test: A zero timeout is a configuration error.
#[tokio::test]
async fn zero_timeout_is_refused() {
    let lifecycle = lifecycle();
    let err = lifecycle
        .add_deploying_node("n1", "start", "x", Duration::ZERO)
        .unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::Configuration);
    assert!(!err.is_attempt_local());
}

/// Test: Descriptions can change while deploying and after loss.
#[tokio::test]
async fn descriptions_are_updated_in_place() {
    let lifecycle = lifecycle();
    let url = add(&lifecycle, "n1", 60_000);

    assert!(lifecycle.update_deploying_node_description(&url, "Job 12 queued"));
    assert_eq!(lifecycle.deploying_node(&url).unwrap().description, "Job 12 queued");

    lifecycle.declare_deploying_node_lost(&url, "exited");
    assert!(lifecycle.update_deploying_node_description(&url, "exited with code 2"));

    let unknown = DeployingNodeUrl::new("deploying://rack1/ghost");
    assert!(!lifecycle.update_deploying_node_description(&unknown, "x"));
}

// =============================================================================
// Removal
// =============================================================================

/// Test: Removal releases the node even when backend cleanup fails.
#[tokio::test]
async fn failed_cleanup_still_releases_the_node() {
    let lifecycle = lifecycle();
    add(&lifecycle, "n1", 60_000);
    let n1 = node("n1");
    lifecycle.register_acquired_node(&n1).unwrap();

    let diagnostics = lifecycle
        .internal_remove_node(&n1, async { Err(LifecycleError::deployment("qdel timed out")) })
        .await;

    assert!(diagnostics.has(WarningKind::RemovalCleanup));
    assert!(!lifecycle.is_acquired(&n1.name));
}

/// Test: Removing an unknown node warns but still runs the backend removal.
#[tokio::test]
async fn removing_an_unknown_node_warns() {
    let lifecycle = lifecycle();
    let ran = Cell::new(false);

    let diagnostics = lifecycle
        .internal_remove_node(&node("ghost"), async {
            ran.set(true);
            Ok(())
        })
        .await;

    assert!(ran.get());
    assert!(diagnostics.has(WarningKind::UntrackedNode));
    assert!(!diagnostics.has(WarningKind::RemovalCleanup));
}

// =============================================================================
// Shutdown and events
// =============================================================================

/// Test: Shutdown forces deploying nodes to lost and refuses new ones.
#[tokio::test(start_paused = true)]
async fn shutdown_forces_deploying_nodes_to_lost() {
    let lifecycle = lifecycle();
    let pending = add(&lifecycle, "n1", 60_000);
    add(&lifecycle, "n2", 60_000);
    lifecycle.register_acquired_node(&node("n2")).unwrap();

    lifecycle.shutdown().await;

    assert!(lifecycle.is_shutting_down());
    assert!(lifecycle.is_lost(&pending));
    assert_eq!(
        lifecycle.deploying_node(&pending).unwrap().description,
        SHUTDOWN_DESCRIPTION
    );
    assert!(lifecycle.is_acquired(&NodeName::new("n2").unwrap()));

    let err = lifecycle
        .add_deploying_node("n3", "start", "x", Duration::from_secs(1))
        .unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::ShuttingDown);

    // Idempotent
    lifecycle.shutdown().await;
    assert_eq!(lifecycle.lost_nodes().len(), 1);
}

/// Test: Subscribers see every transition in order.
#[tokio::test(start_paused = true)]
async fn events_follow_transitions() {
    let lifecycle = lifecycle();
    let mut events = lifecycle.subscribe();

    let n1 = add(&lifecycle, "n1", 60_000);
    add(&lifecycle, "n2", 500);
    lifecycle.register_acquired_node(&node("n1")).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    lifecycle
        .internal_remove_node(&node("n1"), async { Ok(()) })
        .await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.kind, event.node));
    }
    assert_eq!(
        seen,
        vec![
            (NodeEventKind::Added, "n1".to_string()),
            (NodeEventKind::Added, "n2".to_string()),
            (NodeEventKind::Acquired, "n1".to_string()),
            (NodeEventKind::Lost, "n2".to_string()),
            (NodeEventKind::Released, "n1".to_string()),
        ]
    );
    assert_eq!(lifecycle.phase(&n1), NodePhase::Unknown);
}

/// Test: Status counts each collection.
#[tokio::test]
async fn status_counts_collections() {
    let lifecycle = lifecycle();
    add(&lifecycle, "n1", 60_000);
    let lost = add(&lifecycle, "n2", 60_000);
    add(&lifecycle, "n3", 60_000);
    lifecycle.declare_deploying_node_lost(&lost, "exited");
    lifecycle.register_acquired_node(&node("n3")).unwrap();

    let status = lifecycle.status();
    assert_eq!(status.source, "rack1");
    assert_eq!(status.counts.deploying, 1);
    assert_eq!(status.counts.lost, 1);
    assert_eq!(status.counts.acquired, 1);
    assert!(!status.persistent);
}
