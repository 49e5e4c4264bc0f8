// ABOUTME: Compile-fail test verifying a submission has no job before it is submitted.
// ABOUTME: job() only exists once the submit command has been launched.

use kahua::batch::{Submission, Submitting};

fn job_of(submission: &Submission<Submitting>) {
    let _ = submission.job(); // ERROR: no method `job` on Submission<Submitting>
}

fn main() {
    let _ = job_of;
}
