// ABOUTME: Compile-fail test verifying a submission cannot be monitored before it is submitted.
// ABOUTME: monitor() only exists on Submission<Monitoring>.

use kahua::batch::{BatchState, MonitorSettings, Pbs, Submission, Submitting};
use kahua::exec::LocalRunner;
use kahua::lifecycle::NodeLifecycle;

async fn drive(lifecycle: &NodeLifecycle<BatchState>, submission: Submission<Submitting>) {
    let runner = LocalRunner::new();
    let _ = submission
        // ERROR: no method `monitor` on Submission<Submitting>
        .monitor(lifecycle, &Pbs, &runner, &MonitorSettings::default())
        .await;
}

fn main() {
    let _ = drive;
}
