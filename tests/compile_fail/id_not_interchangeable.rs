// ABOUTME: Compile-fail test verifying JobId and DeployingNodeUrl are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use kahua::types::{DeployingNodeUrl, JobId};

fn takes_deploying_url(_url: DeployingNodeUrl) {}

fn main() {
    let job = JobId::new("12345.server");
    takes_deploying_url(job); // ERROR: expected DeployingNodeUrl, found JobId
}
