//! Computation nodes.
//!
//! A node owns an async subroutine, the qualified names of the inputs it
//! consumes, the labels of the outputs it produces, and bookkeeping from
//! past runs (timings, success flags, logged errors, the last result).
//!
//! [`GraphNode`] is the plain variant: its subroutine is an arbitrary async
//! closure. [`processing::DataProcessingNode`] runs a validate/hook/format
//! pipeline around an injected processor, and [`external::ExternalApiNode`]
//! calls an HTTP or WebSocket backend with retries. All variants are stored
//! behind the [`ExecutableNode`] trait, which is the only surface the graph
//! container and executor rely on.
//!
//! # Example
//!
//! ```rust
//! use ecgraph_core::node::{subroutine, ExecutableNode, GraphNode, NodeConfig};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut node = GraphNode::new(
//!     NodeConfig::new()
//!         .with_node_id("double")
//!         .with_input_names(["external.value"])
//!         .with_output_names(["doubled"])
//!         .with_subroutine(subroutine(|inputs| async move {
//!             let n = inputs
//!                 .and_then(|m| m.get("external.value").and_then(|v| v.as_i64()))
//!                 .unwrap_or(0);
//!             Ok(json!({"doubled": n * 2}))
//!         })),
//! )
//! .unwrap();
//!
//! let inputs: ecgraph_core::ValueMap =
//!     [("external.value".to_string(), json!(21))].into();
//! assert!(node.execute(Some(inputs), true).await);
//! assert_eq!(node.last_result().unwrap()["doubled"], json!(42));
//! # }
//! ```

pub mod external;
pub mod processing;

use crate::algo::NodeId;
use crate::error::{GraphError, Result};
use crate::graph::ExecutionGraph;
use crate::names;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// Named values exchanged between nodes: output label (or qualified input
/// name) to opaque payload.
pub type ValueMap = HashMap<String, Value>;

/// Error type subroutines may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a node subroutine.
pub type SubroutineFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, BoxError>> + Send>>;

/// A node's async subroutine: receives the gathered input values (absent
/// when the node declares no inputs) and yields an output value. Object
/// results are stored as-is; anything else is wrapped as `{"result": v}`.
pub type Subroutine = Arc<dyn Fn(Option<ValueMap>) -> SubroutineFuture + Send + Sync>;

/// Snapshot handed to a node's completion callback.
#[derive(Debug, Clone)]
pub struct NodeCompletion {
    /// Id of the node that completed.
    pub node_id: NodeId,
    /// The result the node just produced.
    pub result: ValueMap,
}

/// Callback invoked after a node's successful execution.
pub type CompletionCallback =
    Arc<dyn Fn(NodeCompletion) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`Subroutine`].
pub fn subroutine<F, Fut>(f: F) -> Subroutine
where
    F: Fn(Option<ValueMap>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |inputs| Box::pin(f(inputs)))
}

/// Output label every node advertises when none are configured.
pub const DEFAULT_OUTPUT_LABEL: &str = "defaultOutput";

/// Declarative configuration shared by all node variants.
#[derive(Clone, Default)]
pub struct NodeConfig {
    /// Node id; generated when absent.
    pub node_id: Option<NodeId>,
    /// Qualified names of the inputs this node consumes.
    pub input_names: Option<Vec<String>>,
    /// Fallback values for inputs the run does not supply.
    pub input_defaults: Option<ValueMap>,
    /// Output labels; defaults to `["defaultOutput"]`.
    pub output_names: Option<Vec<String>>,
    /// Whether execution errors are appended to the node's error log.
    pub log_errors: bool,
    /// Subroutine to run; required for plain nodes.
    pub subroutine: Option<Subroutine>,
}

impl NodeConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node id.
    pub fn with_node_id(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    /// Set the declared input names.
    pub fn with_input_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set default values for declared inputs.
    pub fn with_input_defaults(mut self, defaults: ValueMap) -> Self {
        self.input_defaults = Some(defaults);
        self
    }

    /// Set the output labels.
    pub fn with_output_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Opt into error logging.
    pub fn with_log_errors(mut self, log_errors: bool) -> Self {
        self.log_errors = log_errors;
        self
    }

    /// Set the subroutine.
    pub fn with_subroutine(mut self, subroutine: Subroutine) -> Self {
        self.subroutine = Some(subroutine);
        self
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("node_id", &self.node_id)
            .field("input_names", &self.input_names)
            .field("output_names", &self.output_names)
            .field("log_errors", &self.log_errors)
            .field("subroutine", &self.subroutine.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// State common to every node variant: identity, declared names, and the
/// per-run histories.
#[derive(Clone)]
pub struct NodeCore {
    pub(crate) node_id: NodeId,
    pub(crate) input_names: Option<Vec<String>>,
    pub(crate) input_defaults: Option<ValueMap>,
    pub(crate) output_names: Vec<String>,
    pub(crate) log_errors: bool,
    pub(crate) execution_timings_ms: Vec<f64>,
    pub(crate) execution_successes: Vec<bool>,
    pub(crate) logged_errors: Vec<String>,
    pub(crate) last_result: Option<ValueMap>,
    pub(crate) on_complete: Option<CompletionCallback>,
}

impl NodeCore {
    /// Build node state from configuration, generating an id when absent.
    pub fn new(config: &NodeConfig) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(ecgraph_utils::generate_unique_id);
        let output_names = match &config.output_names {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => vec![DEFAULT_OUTPUT_LABEL.to_string()],
        };
        Self {
            node_id,
            input_names: config.input_names.clone(),
            input_defaults: config.input_defaults.clone(),
            output_names,
            log_errors: config.log_errors,
            execution_timings_ms: Vec::new(),
            execution_successes: Vec::new(),
            logged_errors: Vec::new(),
            last_result: None,
            on_complete: None,
        }
    }

    /// Install a completion callback.
    pub fn set_completion_callback(&mut self, callback: CompletionCallback) {
        self.on_complete = Some(callback);
    }

    /// Append an error message to the node's log when logging is enabled.
    pub fn log_error(&mut self, message: impl Into<String>) {
        if self.log_errors {
            self.logged_errors.push(message.into());
        }
    }

    /// Record a successful run: store the result and push history entries.
    pub(crate) fn record_success(&mut self, result: ValueMap, started: Option<Instant>) {
        self.last_result = Some(result);
        self.execution_successes.push(true);
        if let Some(started) = started {
            self.execution_timings_ms
                .push(started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    /// Record a failed run: log the message and push history entries.
    pub(crate) fn record_failure(&mut self, message: String, started: Option<Instant>) {
        tracing::warn!(node_id = %self.node_id, error = %message, "node execution failed");
        self.log_error(message);
        self.execution_successes.push(false);
        if let Some(started) = started {
            self.execution_timings_ms
                .push(started.elapsed().as_secs_f64() * 1000.0);
        }
    }

    /// Mean of the most recent `window` measured timings, 0.0 when none.
    pub fn average_execution_time_ms(&self, window: usize) -> f64 {
        if self.execution_timings_ms.is_empty() || window == 0 {
            return 0.0;
        }
        let start = self.execution_timings_ms.len().saturating_sub(window);
        let recent = &self.execution_timings_ms[start..];
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    /// Most recent measured timing, 0.0 when none.
    pub fn last_execution_time_ms(&self) -> f64 {
        self.execution_timings_ms.last().copied().unwrap_or(0.0)
    }

    pub(crate) fn clear_histories(&mut self) {
        self.last_result = None;
        self.execution_timings_ms.clear();
        self.execution_successes.clear();
        self.logged_errors.clear();
    }

    fn base_is_valid(&self, graph: Option<&ExecutionGraph>) -> bool {
        if self.node_id.is_empty() || self.output_names.is_empty() {
            return false;
        }
        if let Some(input_names) = &self.input_names {
            if input_names.is_empty() {
                return false;
            }
            if !input_names
                .iter()
                .all(|name| names::is_valid_qualified_name(name))
            {
                return false;
            }
            if let Some(graph) = graph {
                return graph.contains_output_names(input_names);
            }
        }
        true
    }
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("node_id", &self.node_id)
            .field("input_names", &self.input_names)
            .field("output_names", &self.output_names)
            .field("log_errors", &self.log_errors)
            .field("runs", &self.execution_successes.len())
            .finish()
    }
}

/// Capability surface the graph container stores and the executor drives.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Shared node state.
    fn core(&self) -> &NodeCore;

    /// Shared node state, mutably.
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Run the node against gathered input values. Returns the success
    /// flag; failures are recorded in the node's histories rather than
    /// propagated.
    async fn execute(&mut self, inputs: Option<ValueMap>, measure_time: bool) -> bool;

    /// Release per-run state. Returns true when disposal succeeded.
    async fn dispose(&mut self) -> bool {
        self.core_mut().clear_histories();
        true
    }

    /// The node's id.
    fn node_id(&self) -> &str {
        &self.core().node_id
    }

    /// Declared input names, if any.
    fn input_names(&self) -> Option<&[String]> {
        self.core().input_names.as_deref()
    }

    /// Declared default values for inputs.
    fn input_defaults(&self) -> Option<&ValueMap> {
        self.core().input_defaults.as_ref()
    }

    /// Raw output labels.
    fn output_names(&self) -> &[String] {
        &self.core().output_names
    }

    /// Output labels prefixed with the node id.
    fn qualified_output_names(&self) -> Vec<String> {
        let core = self.core();
        core.output_names
            .iter()
            .map(|label| format!("{}.{}", core.node_id, label))
            .collect()
    }

    /// Distinct producer node ids parsed from the declared input names.
    fn producer_node_ids(&self) -> Vec<NodeId> {
        let Some(input_names) = &self.core().input_names else {
            return Vec::new();
        };
        let mut producer_ids = BTreeSet::new();
        for name in input_names {
            if let Some(node_id) = names::node_id_of(name) {
                producer_ids.insert(node_id);
            }
        }
        producer_ids.into_iter().collect()
    }

    /// True iff the qualified name's label is one of this node's outputs.
    fn contains_output_name(&self, qualified_name: &str) -> bool {
        match names::output_label_of(qualified_name) {
            Some(label) => self.core().output_names.iter().any(|l| l == label),
            None => false,
        }
    }

    /// The result of the most recent successful run.
    fn last_result(&self) -> Option<&ValueMap> {
        self.core().last_result.as_ref()
    }

    /// Errors accumulated while `log_errors` was enabled.
    fn logged_errors(&self) -> &[String] {
        &self.core().logged_errors
    }

    /// Success flags of past runs, oldest first.
    fn execution_successes(&self) -> &[bool] {
        &self.core().execution_successes
    }

    /// Measured durations of past runs in milliseconds, oldest first.
    fn execution_timings_ms(&self) -> &[f64] {
        &self.core().execution_timings_ms
    }

    /// Structural validity: non-empty identity and outputs, well-formed
    /// input names, and (when a graph is supplied) resolvable inputs.
    fn is_valid(&self, graph: Option<&ExecutionGraph>) -> bool {
        self.core().base_is_valid(graph)
    }
}

/// Turn a subroutine's return value into a stored result map.
pub(crate) fn wrap_result_value(value: Value) -> ValueMap {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        other => ValueMap::from([("result".to_string(), other)]),
    }
}

/// The plain node variant: an id, declared names, and an async subroutine.
pub struct GraphNode {
    core: NodeCore,
    subroutine: Subroutine,
}

impl GraphNode {
    /// Build a node from configuration. A missing subroutine is a
    /// construction error.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let core = NodeCore::new(&config);
        let subroutine = config.subroutine.ok_or_else(|| {
            GraphError::Construction(format!("no subroutine for node '{}'", core.node_id))
        })?;
        Ok(Self { core, subroutine })
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode").field("core", &self.core).finish()
    }
}

#[async_trait]
impl ExecutableNode for GraphNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn execute(&mut self, inputs: Option<ValueMap>, measure_time: bool) -> bool {
        let started = measure_time.then(Instant::now);
        match (self.subroutine)(inputs).await {
            Ok(value) => {
                let result = wrap_result_value(value);
                self.core.record_success(result.clone(), started);
                if let Some(callback) = self.core.on_complete.clone() {
                    callback(NodeCompletion {
                        node_id: self.core.node_id.clone(),
                        result,
                    })
                    .await;
                }
                true
            }
            Err(error) => {
                self.core.record_failure(
                    format!("error executing node '{}': {}", self.core.node_id, error),
                    started,
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_node(id: &str) -> GraphNode {
        GraphNode::new(
            NodeConfig::new()
                .with_node_id(id)
                .with_output_names(["echo"])
                .with_subroutine(subroutine(|inputs| async move {
                    Ok(json!({ "echo": inputs.map(|m| m.len()).unwrap_or(0) }))
                })),
        )
        .unwrap()
    }

    #[test]
    fn test_construction_requires_subroutine() {
        let err = GraphNode::new(NodeConfig::new().with_node_id("n")).unwrap_err();
        assert!(matches!(err, GraphError::Construction(_)));
    }

    #[test]
    fn test_generated_id_and_default_output() {
        let node = GraphNode::new(
            NodeConfig::new().with_subroutine(subroutine(|_| async { Ok(json!(null)) })),
        )
        .unwrap();
        assert!(!node.node_id().is_empty());
        assert_eq!(node.output_names(), [DEFAULT_OUTPUT_LABEL.to_string()]);
    }

    #[test]
    fn test_qualified_outputs_and_producers() {
        let node = GraphNode::new(
            NodeConfig::new()
                .with_node_id("b")
                .with_input_names(["a.out", "a.other", "external.text"])
                .with_output_names(["x", "y"])
                .with_subroutine(subroutine(|_| async { Ok(json!({})) })),
        )
        .unwrap();
        assert_eq!(node.qualified_output_names(), vec!["b.x", "b.y"]);
        assert_eq!(node.producer_node_ids(), vec!["a", "external"]);
        assert!(node.contains_output_name("b.x"));
        assert!(!node.contains_output_name("b.z"));
        assert!(!node.contains_output_name("unqualified"));
    }

    #[tokio::test]
    async fn test_execute_records_success_history() {
        let mut node = echo_node("n1");
        assert!(node.execute(None, true).await);
        assert_eq!(node.execution_successes(), [true]);
        assert_eq!(node.execution_timings_ms().len(), 1);
        assert_eq!(node.last_result().unwrap()["echo"], json!(0));
    }

    #[tokio::test]
    async fn test_execute_without_measurement_skips_timings() {
        let mut node = echo_node("n1");
        assert!(node.execute(None, false).await);
        assert!(node.execution_timings_ms().is_empty());
        assert_eq!(node.execution_successes(), [true]);
    }

    #[tokio::test]
    async fn test_non_object_result_is_wrapped() {
        let mut node = GraphNode::new(
            NodeConfig::new()
                .with_node_id("wrap")
                .with_subroutine(subroutine(|_| async { Ok(json!("plain")) })),
        )
        .unwrap();
        assert!(node.execute(None, true).await);
        assert_eq!(node.last_result().unwrap()["result"], json!("plain"));
    }

    #[tokio::test]
    async fn test_failure_is_logged_when_opted_in() {
        let mut node = GraphNode::new(
            NodeConfig::new()
                .with_node_id("broken")
                .with_log_errors(true)
                .with_subroutine(subroutine(|_| async {
                    Err::<Value, BoxError>("boom".into())
                })),
        )
        .unwrap();
        assert!(!node.execute(None, true).await);
        assert_eq!(node.execution_successes(), [false]);
        assert_eq!(node.logged_errors().len(), 1);
        assert!(node.logged_errors()[0].contains("boom"));
        assert!(node.last_result().is_none());
    }

    #[tokio::test]
    async fn test_failure_is_silent_without_opt_in() {
        let mut node = GraphNode::new(
            NodeConfig::new()
                .with_node_id("quiet")
                .with_subroutine(subroutine(|_| async {
                    Err::<Value, BoxError>("boom".into())
                })),
        )
        .unwrap();
        assert!(!node.execute(None, true).await);
        assert!(node.logged_errors().is_empty());
    }

    #[tokio::test]
    async fn test_completion_callback_receives_result() {
        use std::sync::Mutex;

        let seen: Arc<Mutex<Option<NodeCompletion>>> = Arc::new(Mutex::new(None));
        let seen_in_cb = seen.clone();
        let mut node = echo_node("cb");
        node.core_mut().set_completion_callback(Arc::new(move |completion| {
            let seen = seen_in_cb.clone();
            Box::pin(async move {
                *seen.lock().unwrap() = Some(completion);
            })
        }));

        assert!(node.execute(None, true).await);
        let completion = seen.lock().unwrap().take().unwrap();
        assert_eq!(completion.node_id, "cb");
        assert_eq!(completion.result["echo"], json!(0));
    }

    #[tokio::test]
    async fn test_dispose_clears_histories() {
        let mut node = echo_node("d");
        node.execute(None, true).await;
        assert!(node.dispose().await);
        assert!(node.last_result().is_none());
        assert!(node.execution_successes().is_empty());
        assert!(node.execution_timings_ms().is_empty());
    }

    #[test]
    fn test_timing_accessors() {
        let mut node = echo_node("t");
        node.core_mut().execution_timings_ms = vec![10.0, 20.0, 30.0];
        assert_eq!(node.core().last_execution_time_ms(), 30.0);
        assert_eq!(node.core().average_execution_time_ms(2), 25.0);
        assert_eq!(node.core().average_execution_time_ms(10), 20.0);
    }
}
