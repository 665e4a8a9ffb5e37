//! Error types for graph construction, validation, and execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. The taxonomy
//! follows the lifecycle of a graph: construction problems surface while
//! loading, validation and dependency-closure problems surface before any
//! node runs, and execution problems surface mid-run.
//!
//! Transport-level failures of external API calls live in their own enum,
//! [`ApiCallError`](crate::node::external::ApiCallError); by the time they
//! reach the executor they have already been folded into a node-level
//! failure.
//!
//! # Example
//!
//! ```rust
//! use ecgraph_core::error::{GraphError, Result};
//!
//! fn check_id(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(GraphError::Validation("node id must not be empty".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Comprehensive error type for all graph operations.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A node or graph was created without a required field (for example a
    /// plain node with no subroutine). Halts graph loading.
    #[error("construction failed: {0}")]
    Construction(String),

    /// The graph structure is invalid (cyclic dependency graph, malformed
    /// definition, no resolvable execution order).
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// A declared input has no producer among the graph's members, nested
    /// subgraph outputs, or external inputs. Surfaced before execution
    /// starts.
    #[error("missing dependency: {0}")]
    DependencyClosure(String),

    /// A node's subroutine failed during a run.
    #[error("node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Id of the node that failed.
        node: String,
        /// Error message from node execution.
        error: String,
    },

    /// General execution error without a specific node context.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Graph or node configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation exceeded its time limit.
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error from a declarative graph definition.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure while reading a definition file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// Create a node execution error with context.
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a dependency-closure error naming the unresolvable input.
    pub fn dependency_closure(detail: impl Into<String>) -> Self {
        Self::DependencyClosure(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_execution_display() {
        let err = GraphError::node_execution("fetch", "connection refused");
        assert_eq!(
            err.to_string(),
            "node 'fetch' execution failed: connection refused"
        );
    }

    #[test]
    fn test_timeout_display() {
        let err = GraphError::Timeout {
            operation: "API call".to_string(),
            duration_ms: 5000,
        };
        assert_eq!(err.to_string(), "operation timed out after 5000ms: API call");
    }

    #[test]
    fn test_serde_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: GraphError = parse_err.into();
        assert!(matches!(err, GraphError::Serialization(_)));
    }
}
