// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Normal, quiet (CI), and JSON output modes for messages, node events, and status.

use serde::Serialize;
use std::time::Instant;

use crate::lifecycle::{NodeCounts, NodeEvent, NodeEventKind};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// One row of `kahua status`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeRow {
    pub node: String,
    pub phase: &'static str,
    pub description: String,
}

/// What `kahua status` reports for one source.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub source: String,
    pub kind: String,
    pub counts: NodeCounts,
    /// When the state was last persisted, if it came from a snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub written_at: Option<String>,
    pub nodes: Vec<NodeRow>,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => print_json(&JsonEvent {
                event: "success",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => print_json(&JsonEvent {
                event: "warning",
                message,
                duration_secs: self.duration(),
            }),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }

    /// Print a lifecycle transition as it happens.
    pub fn node_event(&self, event: &NodeEvent) {
        match self.mode {
            OutputMode::Normal => println!("{}", describe_event(event)),
            // Failures only
            OutputMode::Quiet => {
                if event.kind == NodeEventKind::Lost {
                    println!("{}", describe_event(event));
                }
            }
            OutputMode::Json => print_json(event),
        }
    }

    pub fn status(&self, report: &StatusReport) {
        match self.mode {
            OutputMode::Json => print_json(report),
            OutputMode::Quiet => println!(
                "{}: {} acquired, {} deploying, {} lost",
                report.source,
                report.counts.acquired,
                report.counts.deploying,
                report.counts.lost
            ),
            OutputMode::Normal => {
                println!("Source:    {} ({})", report.source, report.kind);
                if let Some(written_at) = &report.written_at {
                    println!("Saved:     {written_at}");
                }
                println!(
                    "Nodes:     {} acquired, {} deploying, {} lost",
                    report.counts.acquired, report.counts.deploying, report.counts.lost
                );
                for row in &report.nodes {
                    println!("  {:<10} {}  {}", row.phase, row.node, row.description);
                }
            }
        }
    }
}

/// One-line human description of a node event.
pub fn describe_event(event: &NodeEvent) -> String {
    let verb = match event.kind {
        NodeEventKind::Added => "deploying",
        NodeEventKind::Lost => "lost",
        NodeEventKind::Acquired => "acquired",
        NodeEventKind::Removed => "removed",
        NodeEventKind::Released => "released",
    };
    if event.description.is_empty() {
        format!("[{}] {} {}", event.source, event.node, verb)
    } else {
        format!(
            "[{}] {} {}: {}",
            event.source, event.node, verb, event.description
        )
    }
}

fn print_json<T: Serialize>(value: &T) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{json}");
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
