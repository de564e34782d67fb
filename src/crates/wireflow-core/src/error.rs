//! Error types and error handling for workflow execution
//!
//! This module defines all error types that can occur during workflow
//! validation, execution, and evolution. All errors implement
//! `std::error::Error` via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── Validation          - Pre-run structural validation (issue list)
//! ├── NodeConfig          - Executor rejected a node's configuration
//! ├── NodeExecution       - A node failed during execute
//! ├── Agent               - Agent runner failure
//! ├── Script              - Scripted transform threw
//! ├── Timeout             - Operation exceeded its deadline
//! ├── ApprovalTimeout     - Approval deadline with timeoutAction = fail
//! ├── Cancelled           - Cooperative interrupt
//! ├── EvolutionValidation - Proposed mutations rejected (error list)
//! ├── WorkflowNotFound    - Evolution target absent from the store
//! ├── EdgeConflict        - Duplicate edge during evolution apply
//! ├── CycleIntroduced     - Mutation batch would create a cycle
//! ├── Serialization/Io    - Wrapped serde_json / std::io errors
//! ├── Store               - Wrapped persistence errors
//! └── Custom              - Application-defined errors
//! ```
//!
//! # Propagation policy
//!
//! Executor failures become `node-error` events and, unless a feedback
//! loop absorbs them, abort the run with `execution-error`. [`Cancelled`]
//! never produces a per-node error; it surfaces once, after all executors
//! quiesce. Validation failures are reported in full, never piecewise.
//!
//! [`Cancelled`]: EngineError::Cancelled

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// One finding from pre-run workflow validation.
///
/// Validation collects every finding before failing so callers can report
/// the complete list at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// Stable machine-readable code, e.g. `ORPHANED_NODE`
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Offending node, when the finding is node-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node_id: None,
        }
    }

    pub fn for_node(
        code: impl Into<String>,
        message: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node_id: Some(node_id.into()),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "[{}] {} (node {})", self.code, self.message, node),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Comprehensive error type for all engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Pre-run workflow validation failed; carries every finding at once
    #[error("Workflow validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// An executor rejected a node's configuration before dispatch
    #[error("Invalid configuration for node '{node}': {message}")]
    NodeConfig {
        /// Node whose configuration failed validation
        node: String,
        message: String,
    },

    /// A node failed during execution
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Node that failed
        node: String,
        /// Error message from the executor
        error: String,
    },

    /// The agent runner failed or reported an error chunk
    #[error("Agent failure in node '{node}': {message}")]
    Agent { node: String, message: String },

    /// A scripted transform threw
    #[error("Script failure in node '{node}': {message}")]
    Script { node: String, message: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out
        operation: String,
        duration_ms: u64,
    },

    /// Approval deadline fired with `timeoutAction = fail`
    #[error("Approval timed out at node '{node}'")]
    ApprovalTimeout { node: String },

    /// Cooperative interrupt; produced by `interrupt()`, never by a node
    #[error("Execution interrupted")]
    Cancelled,

    /// Proposed evolution rejected; carries the complete error list
    #[error("Evolution validation failed: {}", .0.join("; "))]
    EvolutionValidation(Vec<String>),

    /// Evolution target workflow absent from the store
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A mutation would duplicate an existing edge
    #[error("Edge conflict: {0}")]
    EdgeConflict(String),

    /// A mutation batch would make the graph cyclic
    #[error("Cycle introduced: {0}")]
    CycleIntroduced(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence error
    #[error("Store error: {0}")]
    Store(#[from] wireflow_store::StoreError),

    /// Custom application-defined error
    #[error("{0}")]
    Custom(String),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a node configuration error
    pub fn node_config(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeConfig {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an agent runner error
    pub fn agent(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Agent {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a script error
    pub fn script(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Script {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether this error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_issue() {
        let err = EngineError::Validation(vec![
            ValidationIssue::new("CYCLE", "graph contains a cycle"),
            ValidationIssue::for_node("DUPLICATE_NAME", "name 'Agent' reused", "node-2"),
        ]);
        let text = err.to_string();
        assert!(text.contains("[CYCLE]"));
        assert!(text.contains("[DUPLICATE_NAME]"));
        assert!(text.contains("node-2"));
    }

    #[test]
    fn helper_constructors() {
        let err = EngineError::node_execution("agent-1", "runner crashed");
        assert_eq!(err.to_string(), "Node 'agent-1' execution failed: runner crashed");

        let err = EngineError::timeout("script eval", 5000);
        assert_eq!(err.to_string(), "Operation timed out after 5000ms: script eval");

        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::Custom("x".into()).is_cancelled());
    }
}
