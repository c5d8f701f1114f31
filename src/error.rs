//! Error types for the pipeline crate

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ConfigError;
use crate::memory::AccessClass;

/// Category of a job-description problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Malformed or missing mandatory field
    Config,
    /// A mandatory path does not exist on disk
    Resource,
}

/// A single problem found while loading a job description
///
/// Issues are collected across the whole description before the load is
/// rejected, so a caller can report every broken item at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Config or resource problem
    pub kind: IssueKind,
    /// Item locator, e.g. `data[0]` or `param`
    pub item: String,
    /// Offending field (empty for whole-item problems)
    pub field: String,
    /// Human-readable cause
    pub message: String,
}

impl ConfigIssue {
    /// Create a configuration issue
    pub fn config(item: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Config,
            item: item.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a missing-resource issue
    pub fn resource(item: impl Into<String>, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: IssueKind::Resource,
            item: item.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            IssueKind::Config => "config",
            IssueKind::Resource => "resource",
        };
        if self.field.is_empty() {
            write!(f, "[{}] {}: {}", kind, self.item, self.message)
        } else {
            write!(f, "[{}] {}.{}: {}", kind, self.item, self.field, self.message)
        }
    }
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}

/// Errors that can occur while loading, compiling or running a pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Job description rejected (all issues found, not just the first)
    #[error("Invalid job description ({} issue(s)): {}", .0.len(), join_issues(.0))]
    Config(Vec<ConfigIssue>),

    /// Job description is not valid JSON
    #[error("Failed to parse job description: {0}")]
    Json(#[from] serde_json::Error),

    /// Compute backend initialization or submission failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// A bounded wait expired
    #[error("Timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    /// Arena cursor would pass the reserved capacity
    #[error("Arena {class} exhausted: requested {requested} bytes, {available} available")]
    Capacity {
        class: AccessClass,
        requested: u64,
        available: u64,
    },

    /// Allocator used out of order (reserve after creation, allocate before)
    #[error("Allocation error: {0}")]
    Allocation(String),

    /// I/O engine could not be created or drained
    #[error("I/O engine error: {0}")]
    IoEngine(String),

    /// File system error outside the per-command I/O path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file could not be loaded
    #[error(transparent)]
    Settings(#[from] ConfigError),
}

impl PipelineError {
    /// Issues carried by a rejected job description
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            PipelineError::Config(issues) => issues,
            _ => &[],
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_display() {
        let issue = ConfigIssue::config("data[0]", "source", "missing mandatory field");
        assert_eq!(issue.to_string(), "[config] data[0].source: missing mandatory field");

        let issue = ConfigIssue::resource("program[1]", "", "kernel not found");
        assert_eq!(issue.to_string(), "[resource] program[1]: kernel not found");
    }

    #[test]
    fn test_config_error_lists_all_issues() {
        let err = PipelineError::Config(vec![
            ConfigIssue::config("data[0]", "size", "missing mandatory field"),
            ConfigIssue::resource("data[1]", "path", "does not exist"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("2 issue(s)"));
        assert!(msg.contains("data[0].size"));
        assert!(msg.contains("data[1].path"));
        assert_eq!(err.issues().len(), 2);
    }
}
