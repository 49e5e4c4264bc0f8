// ABOUTME: Check command implementation.
// ABOUTME: Builds the configured node source without acquiring anything.

use kahua::config::Config;
use kahua::error::Result;
use kahua::output::Output;
use kahua::source::Registry;
use std::path::Path;

/// Validate `config` by building its node source.
///
/// The source is not shut down: that would force recovered deploying nodes
/// to lost in the persisted state.
pub fn check(config: &Config, base_dir: &Path, output: &Output) -> Result<()> {
    output.progress(&format!(
        "Checking node source {} ({})",
        config.source, config.infrastructure.kind
    ));
    if let Some(credentials) = &config.credentials {
        output.progress(&format!("  → Credentials from {}", credentials.describe()));
    }

    let source = Registry::with_defaults().create_from_config(config, base_dir)?;
    let status = source.status();

    output.progress(&format!(
        "  → State {}",
        if status.persistent {
            "persisted"
        } else {
            "kept in memory"
        }
    ));
    output.success(&format!(
        "Configuration OK: {} source '{}' ({} acquired, {} deploying, {} lost)",
        source.kind(),
        source.name(),
        status.counts.acquired,
        status.counts.deploying,
        status.counts.lost
    ));
    Ok(())
}
