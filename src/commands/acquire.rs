// ABOUTME: Acquire command implementation.
// ABOUTME: Dispatches acquisition attempts, prints node events, then shuts the source down.

use kahua::config::Config;
use kahua::error::Result;
use kahua::output::Output;
use kahua::source::Registry;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Acquire one node, or every node with `all`, and follow the attempts
/// until they finish or `wait` elapses.
pub async fn acquire(
    config: &Config,
    base_dir: &Path,
    all: bool,
    wait: Option<Duration>,
    mut output: Output,
) -> Result<()> {
    output.start_timer();
    let source = Registry::with_defaults().create_from_config(config, base_dir)?;
    let mut events = source.subscribe();

    let dispatched = if all {
        source.acquire_all_nodes()?
    } else {
        usize::from(source.acquire_node()?)
    };
    if dispatched == 0 {
        output.warning(&format!("{} has no capacity left", source.name()));
    } else {
        output.progress(&format!(
            "Dispatched {} acquisition attempt(s) on {}",
            dispatched,
            source.name()
        ));
    }

    let idle = async {
        match wait {
            Some(limit) => {
                if tokio::time::timeout(limit, source.wait_idle()).await.is_err() {
                    tracing::info!("Stopped waiting after {:?}", limit);
                }
            }
            None => source.wait_idle().await,
        }
    };
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => break,
            event = events.recv() => match event {
                Ok(event) => output.node_event(&event),
                Err(RecvError::Lagged(missed)) => tracing::warn!("Missed {} node events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = source.status();
    source.shutdown().await;

    loop {
        match events.try_recv() {
            Ok(event) => output.node_event(&event),
            Err(TryRecvError::Lagged(missed)) => tracing::warn!("Missed {} node events", missed),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    output.success(&format!(
        "{}: {} acquired, {} deploying, {} lost",
        source.name(),
        status.counts.acquired,
        status.counts.deploying,
        status.counts.lost
    ));
    Ok(())
}
