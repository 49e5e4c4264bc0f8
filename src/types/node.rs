// ABOUTME: The node description presented by the remote side when it registers.
// ABOUTME: Carries the name used for bookkeeping plus the runtime URL and host.

use serde::{Deserialize, Serialize};

use super::NodeName;

/// A node that reached the manager through the runtime's registration protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredNode {
    pub name: NodeName,
    /// URL of the node in the distributed runtime.
    pub url: String,
    /// Address of the machine the node runs on, when the runtime reports it.
    #[serde(default)]
    pub host: Option<String>,
}

impl RegisteredNode {
    pub fn new(name: NodeName, url: impl Into<String>) -> Self {
        Self {
            name,
            url: url.into(),
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}
