// ABOUTME: Integration tests for the batch queue source and its submission protocol.
// ABOUTME: Scheduler commands are scripted; the clock is paused so deadlines fire on demand.

mod support;

use kahua::batch::{
    BatchQueueAdapter, BatchQueueSource, BatchSettings, BatchState, Lsf, MonitorSettings, Pbs,
    QueueFamily, Submission,
};
use kahua::diagnostics::WarningKind;
use kahua::exec::{CommandTemplate, Connector};
use kahua::lifecycle::{LifecycleErrorKind, NoHooks, NodeLifecycle, NodePhase, SHUTDOWN_DESCRIPTION};
use kahua::source::NodeSource;
use kahua::types::{DeployingNodeUrl, JobId, NodeName, RegisteredNode};
use std::sync::Arc;
use std::time::Duration;
use support::{Script, ScriptedRunner, settle};

const FIRST: &str = "cluster__login_example__0";

fn source<F: QueueFamily>(
    runner: &Arc<ScriptedRunner>,
    family: F,
    max_nodes: u32,
) -> BatchQueueSource<F> {
    support::init_tracing();
    let adapter = BatchQueueAdapter::new(
        family,
        Connector::Runner(runner.clone()),
        "login.example",
        CommandTemplate::parse("start-node --name {node} --url {url}").unwrap(),
        "pnp://manager:64738",
    )
    .with_settings(BatchSettings {
        max_nodes,
        node_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_millis(100),
        ..BatchSettings::default()
    });
    BatchQueueSource::open("cluster", adapter, None).unwrap()
}

fn node(name: &str) -> RegisteredNode {
    RegisteredNode::new(NodeName::new(name).unwrap(), format!("pnp://{name}"))
}

fn url_of(name: &str) -> DeployingNodeUrl {
    DeployingNodeUrl::for_node("cluster", &NodeName::new(name).unwrap())
}

// =============================================================================
// Submission outcomes
// =============================================================================

/// Test: A submission that fails but prints a job id keeps waiting, and the
/// job is recorded when the node registers.
#[tokio::test(start_paused = true)]
async fn failed_submission_with_job_id_is_recovered() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 1, "12345\n"));
    let source = source(&runner, Pbs, 1);

    assert!(source.acquire_node());
    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;

    let url = url_of(FIRST);
    assert_eq!(source.lifecycle().phase(&url), NodePhase::Deploying);
    assert!(
        source
            .lifecycle()
            .deploying_node(&url)
            .unwrap()
            .description
            .contains("Job 12345 possibly queued")
    );

    source.register_node(&node(FIRST)).unwrap();
    source.wait_idle().await;

    let state = source.state();
    assert_eq!(
        state.job_of(&NodeName::new(FIRST).unwrap()),
        Some(&JobId::new("12345"))
    );
    assert_eq!(state.deploying(), 0);
    assert_eq!(state.in_use(), 1);
}

/// Test: A job id printed after the last poll is still recorded when the
/// node registers before the next one.
#[tokio::test(start_paused = true)]
async fn job_id_is_kept_when_registration_beats_the_exit_poll() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::from_millis(150), 0, "12345\n"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_millis(170)).await;
    source.register_node(&node(FIRST)).unwrap();
    source.wait_idle().await;

    assert_eq!(
        source.state().job_of(&NodeName::new(FIRST).unwrap()),
        Some(&JobId::new("12345"))
    );

    let diagnostics = source.remove_node(&node(FIRST)).await;
    assert!(!diagnostics.has_warnings());
    assert_eq!(runner.spawned_matching("qdel 12345"), 1);
}

/// Test: A tentative job whose node never registers is lost and deleted.
#[tokio::test(start_paused = true)]
async fn tentative_job_is_deleted_when_the_node_times_out() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 1, "12345\n"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(61)).await;
    source.wait_idle().await;

    let record = source.lifecycle().deploying_node(&url_of(FIRST)).unwrap();
    assert!(record.lost);
    assert_eq!(record.description, "Timeout occurred after 60000 ms.");
    assert_eq!(runner.spawned_matching("qdel 12345"), 1);
    assert_eq!(source.state().in_use(), 0);
}

/// Test: A job id printed right before the deadline is read and deleted.
#[tokio::test(start_paused = true)]
async fn job_printed_at_the_deadline_is_deleted() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::from_millis(59_950), 0, "4242.server\n"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(61)).await;
    source.wait_idle().await;

    assert!(source.lifecycle().deploying_node(&url_of(FIRST)).unwrap().lost);
    assert_eq!(runner.spawned_matching("qdel 4242.server"), 1);
}

/// Test: A submission that fails without a job id loses the node and frees its slot.
#[tokio::test(start_paused = true)]
async fn failed_submission_without_job_id_is_lost() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::fail_now(1, "qsub: Unauthorized Request"));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    source.wait_idle().await;

    let record = source.lifecycle().deploying_node(&url_of(FIRST)).unwrap();
    assert!(record.lost);
    assert_eq!(
        record.description,
        "Job submission failed with exit code 1: qsub: Unauthorized Request"
    );
    assert_eq!(source.state().in_use(), 0);
    assert_eq!(runner.spawned_matching("qdel"), 0);
}

/// Test: The submit command renders the job through the family's piped submission.
#[tokio::test(start_paused = true)]
async fn submit_command_pipes_the_job() {
    let submitted = "Job <77> is submitted to queue <normal>.";
    let runner = ScriptedRunner::new(Script::exit(Duration::ZERO, 0, submitted));
    let source = source(&runner, Lsf, 1);

    source.acquire_node();
    settle().await;

    let spawned = runner.spawned();
    assert_eq!(
        spawned[0],
        format!("echo \"start-node --name {FIRST} --url pnp://manager:64738\" | bsub")
    );
    assert_eq!(source.kind(), "lsf");

    source.shutdown().await;
}

/// Test: No more than max_nodes submissions or registered nodes exist at once.
#[tokio::test(start_paused = true)]
async fn max_nodes_bounds_acquisition() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "100.server"));
    let source = source(&runner, Pbs, 2);

    assert!(source.acquire_node());
    assert!(source.acquire_node());
    assert!(!source.acquire_node());
    settle().await;

    source.register_node(&node(FIRST)).unwrap();
    assert!(!source.acquire_node());

    // A lost submission frees its slot
    source
        .lifecycle()
        .declare_deploying_node_lost(&url_of("cluster__login_example__1"), "gave up");
    assert_eq!(source.state().in_use(), 1);
    assert!(source.acquire_node());

    source.shutdown().await;
}

/// Test: A zero max_nodes is a configuration error.
#[tokio::test]
async fn zero_max_nodes_is_refused() {
    let runner = ScriptedRunner::new(Script::Hang);
    let adapter = BatchQueueAdapter::new(
        Pbs,
        Connector::Runner(runner.clone()),
        "login.example",
        CommandTemplate::parse("start {node}").unwrap(),
        "pnp://manager:64738",
    )
    .with_settings(BatchSettings {
        max_nodes: 0,
        ..BatchSettings::default()
    });

    let err = BatchQueueSource::open("cluster", adapter, None).unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::Configuration);
}

// =============================================================================
// Deadlines and removal
// =============================================================================

/// Test: A node that never registers is lost at its deadline and its job deleted.
#[tokio::test(start_paused = true)]
async fn timed_out_submission_deletes_its_job() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "4242.server\n"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(61)).await;
    source.wait_idle().await;

    let record = source.lifecycle().deploying_node(&url_of(FIRST)).unwrap();
    assert!(record.lost);
    assert_eq!(record.description, "Timeout occurred after 60000 ms.");
    assert_eq!(runner.spawned_matching("qdel 4242.server"), 1);
    assert_eq!(source.state().in_use(), 0);
}

/// Test: A submit command that cannot be polled trips the breaker and frees the slot.
#[tokio::test(start_paused = true)]
async fn monitoring_faults_trip_the_breaker() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::Faulty);
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    source.wait_idle().await;

    let record = source.lifecycle().deploying_node(&url_of(FIRST)).unwrap();
    assert!(record.lost);
    assert!(record.description.starts_with("Monitoring failed 5 times in a row"));
    assert_eq!(runner.spawned_matching("qdel"), 0);
    assert!(runner.killed() >= 1);
    assert_eq!(source.state().in_use(), 0);
}

/// Test: Removing a registered node deletes its job.
#[tokio::test(start_paused = true)]
async fn removal_deletes_the_job() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "12345.server"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(1)).await;
    source.register_node(&node(FIRST)).unwrap();
    source.wait_idle().await;

    let diagnostics = source.remove_node(&node(FIRST)).await;

    assert!(!diagnostics.has_warnings());
    assert_eq!(runner.spawned_matching("qdel 12345.server"), 1);
    assert!(source.state().current_nodes().is_empty());
    assert!(source.lifecycle().acquired_nodes().is_empty());
}

/// Test: A registered node without a known job is released with a warning.
#[tokio::test(start_paused = true)]
async fn removal_without_job_id_warns() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "queued"));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(1)).await;
    source.register_node(&node(FIRST)).unwrap();
    source.wait_idle().await;

    let diagnostics = source.remove_node(&node(FIRST)).await;

    assert!(diagnostics.has(WarningKind::RemovalCleanup));
    assert_eq!(runner.spawned_matching("qdel"), 0);
    assert_eq!(source.state().in_use(), 0);
}

/// Test: A batch node reported down is removed and its job deleted.
#[tokio::test(start_paused = true)]
async fn down_node_is_removed() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "7.server"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(1)).await;
    source.register_node(&node(FIRST)).unwrap();
    source.wait_idle().await;

    let diagnostics = NodeSource::notify_down_node(&source, &NodeName::new(FIRST).unwrap()).await;

    assert!(!diagnostics.has_warnings());
    assert_eq!(runner.spawned_matching("qdel 7.server"), 1);
    assert_eq!(source.state().in_use(), 0);
}

/// Test: Shutdown loses pending submissions and deletes their jobs.
#[tokio::test(start_paused = true)]
async fn shutdown_deletes_pending_jobs() {
    let runner = ScriptedRunner::new(Script::Hang);
    runner.on("qsub", Script::exit(Duration::ZERO, 0, "55.server"));
    runner.on("qdel", Script::exit(Duration::ZERO, 0, ""));
    let source = source(&runner, Pbs, 1);

    source.acquire_node();
    tokio::time::sleep(Duration::from_secs(1)).await;

    source.shutdown().await;

    let record = source.lifecycle().deploying_node(&url_of(FIRST)).unwrap();
    assert_eq!(record.description, SHUTDOWN_DESCRIPTION);
    assert_eq!(runner.spawned_matching("qdel 55.server"), 1);
    assert!(!source.acquire_node());
}

// =============================================================================
// Submission type-state
// =============================================================================

/// Test: Driving one submission by hand through every state.
#[tokio::test(start_paused = true)]
async fn submission_walks_through_its_states() {
    support::init_tracing();
    let output = "991\nwarning: connection reset";
    let runner = ScriptedRunner::new(Script::exit(Duration::ZERO, 2, output));
    let lifecycle = NodeLifecycle::<BatchState>::new("cluster", Arc::new(NoHooks)).unwrap();

    let submitting = Submission::prepare(
        &lifecycle,
        "n1",
        "qsub job.sh".to_string(),
        "qsub job.sh",
        Duration::from_secs(30),
    )
    .unwrap();
    assert_eq!(submitting.url().as_str(), "deploying://cluster/n1");

    let monitoring = submitting.submit(&lifecycle, &*runner).await.unwrap();
    assert!(monitoring.job().is_none());

    let registration = {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            lifecycle.register_acquired_node(&node("n1"))
        })
    };

    let registered = monitoring
        .monitor(&lifecycle, &Pbs, &*runner, &MonitorSettings::default())
        .await
        .unwrap();
    registration.await.unwrap().unwrap();

    assert!(registered.recovered());
    assert_eq!(registered.job().unwrap().job_id, JobId::new("991"));
    let diagnostics = registered.into_diagnostics();
    assert!(diagnostics.has(WarningKind::AmbiguousRecovery));
}
