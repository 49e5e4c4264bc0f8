// ABOUTME: Status command implementation.
// ABOUTME: Reads the persisted snapshot of the source and prints its nodes.

use kahua::config::Config;
use kahua::error::{Error, Result};
use kahua::lifecycle::{ManagerState, NodeCounts};
use kahua::output::{NodeRow, Output, StatusReport};
use kahua::state::read_snapshot;
use std::path::Path;

pub fn status(config: &Config, base_dir: &Path, output: &Output) -> Result<()> {
    let Some(store) = config.recovery.snapshot_store(base_dir)? else {
        return Err(Error::InvalidConfig(
            "status reads the persisted state; set recovery.enabled to true".to_string(),
        ));
    };

    // Backend state is shown as-is, whatever the kind
    let snapshot = read_snapshot::<ManagerState<serde_json::Value>>(&store, &config.source)?;

    let report = match snapshot {
        None => StatusReport {
            source: config.source.clone(),
            kind: config.infrastructure.kind.clone(),
            counts: NodeCounts::default(),
            written_at: None,
            nodes: Vec::new(),
        },
        Some(snapshot) => {
            let nodes = snapshot.state.nodes();
            let mut rows: Vec<NodeRow> = nodes
                .acquired()
                .map(|name| NodeRow {
                    node: name.to_string(),
                    phase: "acquired",
                    description: String::new(),
                })
                .collect();
            rows.extend(nodes.deploying().map(|record| NodeRow {
                node: record.name.to_string(),
                phase: "deploying",
                description: record.description.clone(),
            }));
            rows.extend(nodes.lost().map(|record| NodeRow {
                node: record.name.to_string(),
                phase: "lost",
                description: record.description.clone(),
            }));

            StatusReport {
                source: config.source.clone(),
                kind: config.infrastructure.kind.clone(),
                counts: nodes.counts(),
                written_at: Some(format!(
                    "{} by {} (pid {})",
                    snapshot.meta.written_at.to_rfc3339(),
                    snapshot.meta.writer,
                    snapshot.meta.pid
                )),
                nodes: rows,
            }
        }
    };

    output.status(&report);
    Ok(())
}
