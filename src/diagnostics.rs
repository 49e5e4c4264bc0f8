// ABOUTME: Diagnostics accumulator for non-fatal warnings during acquisition and removal.
// ABOUTME: Collects warnings that must not fail an operation but should reach operators.

/// Collects non-fatal warnings raised while acquiring or releasing nodes.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{}", warning.message);
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Check if a warning of the given kind was collected.
    pub fn has(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }

    /// Move the warnings of `other` into this accumulator without logging them again.
    pub fn absorb(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// A non-zero submission exit was overridden by a plausible job identifier.
    pub fn ambiguous_recovery(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::AmbiguousRecovery,
            message: message.into(),
        }
    }

    /// Remote cleanup failed while the node was removed anyway.
    pub fn removal_cleanup(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::RemovalCleanup,
            message: message.into(),
        }
    }

    /// A registered node could not be matched to what was deployed.
    pub fn untracked_node(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::UntrackedNode,
            message: message.into(),
        }
    }
}

/// Categories of warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Submission exit code was ignored in favour of an extracted job id.
    AmbiguousRecovery,
    /// Backend teardown failed during removal (process or job may remain).
    RemovalCleanup,
    /// Node is not known to the backend that was asked to release it.
    UntrackedNode,
}
