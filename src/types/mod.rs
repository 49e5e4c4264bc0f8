// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod id;
mod node;
mod node_name;

pub use id::{DEPLOYING_SCHEME, DeployingNodeUrl, Id, JobId};
pub use node::RegisteredNode;
pub use node_name::{NodeName, NodeNameError};
