//! # ecgraph-core: an execution-control graph runtime
//!
//! A library for loading, validating, and running directed acyclic graphs
//! of computation nodes. Nodes exchange opaque JSON values addressed by
//! dotted qualified names (`node.label`, `subgraph.node.label`); the
//! executor resolves a dependency order, seeds caller-supplied external
//! inputs, and awaits each node in turn, including nested subgraphs,
//! which run as single dependency units.
//!
//! ## Components
//!
//! - [`algo`]: adjacency-map primitives, with DFS with pluggable hooks,
//!   cycle detection, topological sort, and DAG reachability.
//! - [`names`]: the dotted qualified-name protocol.
//! - [`node`]: the node variants, from plain subroutine nodes through
//!   data-processing pipelines to external HTTP/WebSocket callers with
//!   retry policy.
//! - [`graph`]: the container holding nodes and nested subgraphs,
//!   dependency derivation, and validity checking.
//! - [`loader`]: declarative JSON/YAML definitions and the registry that
//!   binds handler names to code.
//! - [`executor`]: the async run loop.
//!
//! ## Quick start
//!
//! ```rust
//! use ecgraph_core::{
//!     ExecutionConfig, ExecutionGraph, GraphConfig, GraphNode, NodeConfig, subroutine,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> ecgraph_core::Result<()> {
//! let mut graph = ExecutionGraph::new(
//!     GraphConfig::new()
//!         .with_graph_id("demo")
//!         .with_external_input_names(["external.text"]),
//! );
//! graph.add_node(GraphNode::new(
//!     NodeConfig::new()
//!         .with_node_id("shout")
//!         .with_input_names(["external.text"])
//!         .with_output_names(["loud"])
//!         .with_subroutine(subroutine(|inputs| async move {
//!             let text = inputs
//!                 .and_then(|m| m.get("external.text").and_then(|v| v.as_str().map(String::from)))
//!                 .unwrap_or_default();
//!             Ok(json!({ "loud": text.to_uppercase() }))
//!         })),
//! )?);
//!
//! let config = ExecutionConfig::new().with_external_input("external.text", json!("hello"));
//! assert!(graph.execute(Some(config), true).await?);
//! let results = graph.last_execution_result(false).unwrap();
//! assert_eq!(results["demo.loud"], json!("HELLO"));
//! # Ok(())
//! # }
//! ```

pub mod algo;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod names;
pub mod node;
pub mod retry;

pub use algo::{AdjacencyGraph, NodeId};
pub use error::{GraphError, Result};
pub use executor::ExecutionConfig;
pub use graph::{ExecutionGraph, GraphCallback, GraphConfig, GraphMember};
pub use loader::{GraphDef, SubroutineRegistry};
pub use node::external::{ApiCallError, ApiTransport, ExternalApiConfig, ExternalApiNode};
pub use node::processing::{DataProcessingConfig, DataProcessingNode, ErrorHandlingMode};
pub use node::{
    subroutine, ExecutableNode, GraphNode, NodeCompletion, NodeConfig, Subroutine, ValueMap,
};
pub use retry::{RetryPolicy, RetryState};
