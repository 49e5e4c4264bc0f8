// ABOUTME: Parser for hosts files: one "host [count]" entry per line.
// ABOUTME: Blank lines and # comments are skipped; counts below one become one.

use thiserror::Error;

use super::state::HostTarget;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostsFileError {
    #[error("line {line}: invalid node count '{value}'")]
    InvalidCount { line: usize, value: String },

    #[error("line {line}: unexpected '{value}' after the node count")]
    TrailingInput { line: usize, value: String },

    #[error("hosts file lists no host")]
    Empty,
}

/// Parse one entry; `line` is only used in errors.
pub fn parse_entry(entry: &str, line: usize) -> Result<Option<HostTarget>, HostsFileError> {
    let entry = entry.split('#').next().unwrap_or("").trim();
    let mut fields = entry.split_whitespace();
    let Some(host) = fields.next() else {
        return Ok(None);
    };

    let count = match fields.next() {
        None => 1,
        Some(value) => value
            .parse::<i64>()
            .map_err(|_| HostsFileError::InvalidCount {
                line,
                value: value.to_string(),
            })?
            .clamp(1, i64::from(u32::MAX)) as u32,
    };

    if let Some(extra) = fields.next() {
        return Err(HostsFileError::TrailingInput {
            line,
            value: extra.to_string(),
        });
    }

    Ok(Some(HostTarget::new(host, count)))
}

/// Parse a whole hosts file.
pub fn parse_hosts_file(content: &str) -> Result<Vec<HostTarget>, HostsFileError> {
    let mut targets = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if let Some(target) = parse_entry(line, index + 1)? {
            targets.push(target);
        }
    }
    if targets.is_empty() {
        return Err(HostsFileError::Empty);
    }
    Ok(targets)
}
