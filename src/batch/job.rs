// ABOUTME: Job identifier extracted from a submission, tied to its deploying node.
// ABOUTME: Tentative ids come from submissions that reported failure but printed an id anyway.

use serde::{Deserialize, Serialize};

use crate::types::{DeployingNodeUrl, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobDescriptor {
    pub job_id: JobId,
    pub node_url: DeployingNodeUrl,
    /// The submit command exited non-zero; the id is trusted on faith.
    pub tentative: bool,
}

impl BatchJobDescriptor {
    pub fn confirmed(job_id: JobId, node_url: DeployingNodeUrl) -> Self {
        Self {
            job_id,
            node_url,
            tentative: false,
        }
    }

    pub fn tentative(job_id: JobId, node_url: DeployingNodeUrl) -> Self {
        Self {
            job_id,
            node_url,
            tentative: true,
        }
    }
}
