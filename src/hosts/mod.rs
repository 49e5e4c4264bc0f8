// ABOUTME: Backends that deploy onto a fixed list of hosts.
// ABOUTME: Allocation pool, per-host records, node naming, and the command-template deployer.

mod command;
mod file;
mod naming;
mod pool;
mod record;
mod state;

pub use command::{CommandDeployer, DEFAULT_NODE_TIMEOUT, MONITOR_BREAKER, POLL_INTERVAL};
pub use file::{HostsFileError, parse_entry, parse_hosts_file};
pub use naming::NodeNameBuilder;
pub use pool::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_WAIT_BETWEEN_FAILURES, HostAllocationPool, PoolSettings,
};
pub use record::{HostRecord, HostRecordError};
pub use state::{FailureOutcome, HostTarget, PoolState};
