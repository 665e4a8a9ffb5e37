//! The graph container.
//!
//! An [`ExecutionGraph`] owns its members (leaf nodes and nested subgraphs
//! share one map, keyed by id) together with the declared external-input
//! names and the success/error callbacks. The container derives the
//! dependency adjacency from member declarations, checks that every
//! declared input has a producer, and exposes the results of the most
//! recent run. The run loop itself lives in [`crate::executor`].

use crate::algo::{self, AdjacencyGraph, NodeId};
use crate::executor::ExecutionConfig;
use crate::names;
use crate::node::{ExecutableNode, GraphNode, NodeConfig, ValueMap};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Graph type tag of plain graphs.
pub const GRAPH_TYPE_BASE: &str = "base";

/// Callback awaited when a run finishes; receives the graph so callers can
/// read timings, logged errors, and partial results before constructing
/// the returned future.
pub type GraphCallback =
    Arc<dyn Fn(&ExecutionGraph) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A graph member: a leaf node or a nested subgraph.
pub enum GraphMember {
    /// A computation node.
    Node(Box<dyn ExecutableNode>),
    /// A nested graph, executed as one dependency unit.
    Subgraph(ExecutionGraph),
}

impl std::fmt::Debug for GraphMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(node) => f.debug_tuple("Node").field(&node.node_id()).finish(),
            Self::Subgraph(graph) => f.debug_tuple("Subgraph").field(&graph.graph_id).finish(),
        }
    }
}

/// Declarative configuration of a graph.
#[derive(Clone, Default)]
pub struct GraphConfig {
    /// Graph id; generated when absent.
    pub graph_id: Option<String>,
    /// Graph type tag; defaults to [`GRAPH_TYPE_BASE`].
    pub graph_type: Option<String>,
    /// Names whose values the caller supplies at execution time.
    pub external_input_names: Option<Vec<String>>,
    /// Awaited after a successful run.
    pub success_callback: Option<GraphCallback>,
    /// Awaited after a failed run.
    pub error_callback: Option<GraphCallback>,
}

impl GraphConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graph id.
    pub fn with_graph_id(mut self, id: impl Into<String>) -> Self {
        self.graph_id = Some(id.into());
        self
    }

    /// Set the graph type tag.
    pub fn with_graph_type(mut self, graph_type: impl Into<String>) -> Self {
        self.graph_type = Some(graph_type.into());
        self
    }

    /// Declare external input names.
    pub fn with_external_input_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_input_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Install the success callback.
    pub fn with_success_callback(mut self, callback: GraphCallback) -> Self {
        self.success_callback = Some(callback);
        self
    }

    /// Install the error callback.
    pub fn with_error_callback(mut self, callback: GraphCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConfig")
            .field("graph_id", &self.graph_id)
            .field("graph_type", &self.graph_type)
            .field("external_input_names", &self.external_input_names)
            .field("success_callback", &self.success_callback.as_ref().map(|_| "<fn>"))
            .field("error_callback", &self.error_callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A directed acyclic graph of computation nodes with named value flows.
pub struct ExecutionGraph {
    pub(crate) graph_id: String,
    graph_type: String,
    pub(crate) members: BTreeMap<NodeId, GraphMember>,
    pub(crate) external_input_names: Option<BTreeSet<String>>,
    pub(crate) success_callback: Option<GraphCallback>,
    pub(crate) error_callback: Option<GraphCallback>,
    last_modified_ms: f64,
    pub(crate) last_dep_graph: Option<AdjacencyGraph>,
    pub(crate) external_values: Option<ValueMap>,
    pub(crate) execution_config: Option<ExecutionConfig>,
}

impl ExecutionGraph {
    /// Create a graph from configuration, generating an id when absent.
    pub fn new(config: GraphConfig) -> Self {
        let graph_id = config
            .graph_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(ecgraph_utils::generate_unique_id);
        Self {
            graph_id,
            graph_type: config
                .graph_type
                .unwrap_or_else(|| GRAPH_TYPE_BASE.to_string()),
            members: BTreeMap::new(),
            external_input_names: config
                .external_input_names
                .map(|names| names.into_iter().collect()),
            success_callback: config.success_callback,
            error_callback: config.error_callback,
            last_modified_ms: ecgraph_utils::current_timestamp_ms(),
            last_dep_graph: None,
            external_values: None,
            execution_config: None,
        }
    }

    /// The graph's id.
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    /// The graph's type tag.
    pub fn graph_type(&self) -> &str {
        &self.graph_type
    }

    /// Milliseconds-since-epoch timestamp of the last membership change.
    pub fn last_modified_ms(&self) -> f64 {
        self.last_modified_ms
    }

    /// Declared external input names.
    pub fn external_input_names(&self) -> Option<&BTreeSet<String>> {
        self.external_input_names.as_ref()
    }

    /// The configuration of the most recent run.
    pub fn execution_config(&self) -> Option<&ExecutionConfig> {
        self.execution_config.as_ref()
    }

    /// Add a member. Nodes are stored under their node id (returned);
    /// subgraphs under their graph id (no id returned).
    pub fn add_member(&mut self, member: GraphMember) -> Option<NodeId> {
        self.last_modified_ms = ecgraph_utils::current_timestamp_ms();
        match member {
            GraphMember::Subgraph(subgraph) => {
                self.members
                    .insert(subgraph.graph_id.clone(), GraphMember::Subgraph(subgraph));
                None
            }
            GraphMember::Node(node) => {
                let node_id = node.node_id().to_string();
                self.members
                    .insert(node_id.clone(), GraphMember::Node(node));
                Some(node_id)
            }
        }
    }

    /// Add a computation node, returning its id.
    pub fn add_node(&mut self, node: impl ExecutableNode + 'static) -> NodeId {
        self.add_member(GraphMember::Node(Box::new(node)))
            .expect("node members always yield an id")
    }

    /// Wrap a raw node configuration into a plain node and add it.
    pub fn add_node_config(&mut self, config: NodeConfig) -> crate::error::Result<NodeId> {
        let node = GraphNode::new(config)?;
        Ok(self.add_node(node))
    }

    /// Add a nested subgraph.
    pub fn add_subgraph(&mut self, subgraph: ExecutionGraph) {
        self.add_member(GraphMember::Subgraph(subgraph));
    }

    /// Look up a member by id.
    pub fn get(&self, id: &str) -> Option<&GraphMember> {
        self.members.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut GraphMember> {
        self.members.get_mut(id)
    }

    /// Ids of every member, nodes and subgraphs alike.
    pub fn member_ids(&self) -> Vec<NodeId> {
        self.members.keys().cloned().collect()
    }

    /// True iff a member with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    /// Producer node ids parsed from the declared external input names.
    pub(crate) fn external_node_ids(&self) -> Option<BTreeSet<NodeId>> {
        let external_names = self.external_input_names.as_ref()?;
        let mut node_ids = BTreeSet::new();
        for name in external_names {
            if let Some(node_id) = names::node_id_of(name) {
                node_ids.insert(node_id);
            }
        }
        Some(node_ids)
    }

    /// True iff every name resolves to an external input of this graph or
    /// to an output a member advertises, recursing into nested subgraphs.
    pub fn contains_output_names(&self, output_names: &[String]) -> bool {
        if output_names.is_empty() {
            return false;
        }
        for name in output_names {
            if self
                .external_input_names
                .as_ref()
                .is_some_and(|externals| externals.contains(name))
            {
                continue;
            }
            let Some(node_id) = names::node_id_of(name) else {
                return false;
            };
            if names::has_subgraph_prefix(&node_id) {
                let Some((subgraph_id, _)) = names::split_subgraph(&node_id) else {
                    return false;
                };
                let Some(GraphMember::Subgraph(subgraph)) = self.members.get(subgraph_id) else {
                    return false;
                };
                let inner_name = names::strip_subgraph(name).to_string();
                if !subgraph.contains_output_names(&[inner_name]) {
                    return false;
                }
                continue;
            }
            match self.members.get(&node_id) {
                Some(GraphMember::Node(node)) => {
                    if !node.contains_output_name(name) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Producer → consumers adjacency derived from member declarations.
    /// Members without inbound edges still appear as keys.
    pub fn dependency_graph(&self) -> AdjacencyGraph {
        let mut dependency_graph = AdjacencyGraph::new();
        for (member_id, member) in &self.members {
            let GraphMember::Node(node) = member else {
                continue;
            };
            for producer_id in node.producer_node_ids() {
                dependency_graph
                    .entry(producer_id)
                    .or_default()
                    .push(member_id.clone());
            }
            dependency_graph.entry(member_id.clone()).or_default();
        }
        dependency_graph
    }

    /// True iff every member's declared inputs can be satisfied by another
    /// member, a nested subgraph's outputs, or an external input, and
    /// every nested subgraph is itself valid.
    pub fn is_valid(&self) -> bool {
        let mut dependencies: BTreeSet<NodeId> = BTreeSet::new();
        for member in self.members.values() {
            match member {
                GraphMember::Subgraph(subgraph) => {
                    if !subgraph.is_valid() {
                        return false;
                    }
                }
                GraphMember::Node(node) => {
                    if !node.is_valid(Some(self)) {
                        return false;
                    }
                    dependencies.extend(node.producer_node_ids());
                }
            }
        }

        let mut available: BTreeSet<NodeId> = BTreeSet::new();
        for (member_id, member) in &self.members {
            match member {
                GraphMember::Subgraph(subgraph) => {
                    if let Some(output_ids) = subgraph.output_node_ids() {
                        for output_id in output_ids {
                            available.insert(format!("{}.{}", subgraph.graph_id, output_id));
                        }
                    }
                }
                GraphMember::Node(_) => {
                    available.insert(member_id.clone());
                }
            }
        }
        if let Some(external_ids) = self.external_node_ids() {
            available.extend(external_ids);
        }

        dependencies.is_subset(&available)
    }

    /// Leaf node ids of the dependency graph; `None` when the graph is not
    /// valid.
    pub fn output_node_ids(&self) -> Option<Vec<NodeId>> {
        if !self.is_valid() {
            return None;
        }
        Some(algo::leaves(&self.dependency_graph()))
    }

    /// Results of the most recent run, keyed `"{graph_id}.{label}"`.
    ///
    /// By default only the dependency-graph leaves contribute; with
    /// `all_nodes` every member does. `None` before any execution.
    pub fn last_execution_result(&self, all_nodes: bool) -> Option<ValueMap> {
        let dependency_graph = self.last_dep_graph.as_ref()?;
        let leaf_ids = algo::leaves(dependency_graph);
        if leaf_ids.is_empty() {
            return None;
        }
        let target_ids: Vec<NodeId> = if all_nodes {
            self.members.keys().cloned().collect()
        } else {
            leaf_ids
        };

        let mut output = ValueMap::new();
        for member_id in target_ids {
            // Qualified subgraph producer ids in the stored dependency
            // graph have no member entry of their own.
            let Some(member) = self.members.get(&member_id) else {
                continue;
            };
            let member_result = match member {
                GraphMember::Node(node) => node.last_result().cloned(),
                GraphMember::Subgraph(subgraph) => subgraph.last_execution_result(false),
            };
            if let Some(result) = member_result {
                for (label, value) in result {
                    output.insert(format!("{}.{}", self.graph_id, label), value);
                }
            }
        }
        Some(output)
    }

    /// The most recent result of one member.
    pub fn last_execution_result_from_node(&self, node_id: &str) -> Option<ValueMap> {
        match self.members.get(node_id)? {
            GraphMember::Node(node) => node.last_result().cloned(),
            GraphMember::Subgraph(subgraph) => subgraph.last_execution_result(false),
        }
    }

    /// Dispose every member, removing those that report success.
    pub fn dispose(&mut self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let member_ids: Vec<NodeId> = self.members.keys().cloned().collect();
            for member_id in member_ids {
                let disposed = match self.members.get_mut(&member_id) {
                    Some(GraphMember::Node(node)) => node.dispose().await,
                    Some(GraphMember::Subgraph(subgraph)) => subgraph.dispose().await,
                    None => continue,
                };
                if disposed {
                    self.members.remove(&member_id);
                }
            }
            true
        })
    }
}

impl std::fmt::Debug for ExecutionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGraph")
            .field("graph_id", &self.graph_id)
            .field("graph_type", &self.graph_type)
            .field("members", &self.members)
            .field("external_input_names", &self.external_input_names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{subroutine, GraphNode, NodeConfig};
    use serde_json::json;

    fn stub_node(id: &str, inputs: Option<Vec<&str>>, outputs: Vec<&str>) -> GraphNode {
        let mut config = NodeConfig::new()
            .with_node_id(id)
            .with_output_names(outputs)
            .with_subroutine(subroutine(|_| async { Ok(json!({})) }));
        if let Some(inputs) = inputs {
            config = config.with_input_names(inputs);
        }
        GraphNode::new(config).unwrap()
    }

    fn chain_graph() -> ExecutionGraph {
        let mut graph = ExecutionGraph::new(
            GraphConfig::new()
                .with_graph_id("g")
                .with_external_input_names(["external.text"]),
        );
        graph.add_node(stub_node("a", Some(vec!["external.text"]), vec!["value"]));
        graph.add_node(stub_node("b", Some(vec!["a.value"]), vec!["final"]));
        graph
    }

    #[test]
    fn test_generated_graph_id() {
        let graph = ExecutionGraph::new(GraphConfig::new());
        assert!(!graph.graph_id().is_empty());
        assert_eq!(graph.graph_type(), GRAPH_TYPE_BASE);
    }

    #[test]
    fn test_add_member_returns_node_ids_only() {
        let mut graph = ExecutionGraph::new(GraphConfig::new().with_graph_id("g"));
        let node_id = graph.add_member(GraphMember::Node(Box::new(stub_node(
            "n",
            None,
            vec!["out"],
        ))));
        assert_eq!(node_id.as_deref(), Some("n"));

        let subgraph = ExecutionGraph::new(GraphConfig::new().with_graph_id("sub"));
        let subgraph_id = graph.add_member(GraphMember::Subgraph(subgraph));
        assert!(subgraph_id.is_none());
        assert!(graph.contains("sub"));
        assert_eq!(graph.member_ids(), vec!["n", "sub"]);
    }

    #[test]
    fn test_contains_output_names() {
        let graph = chain_graph();
        assert!(graph.contains_output_names(&["external.text".to_string()]));
        assert!(graph.contains_output_names(&["a.value".to_string(), "b.final".to_string()]));
        assert!(!graph.contains_output_names(&["a.missing".to_string()]));
        assert!(!graph.contains_output_names(&["ghost.value".to_string()]));
        assert!(!graph.contains_output_names(&[]));
        assert!(!graph.contains_output_names(&["notqualified".to_string()]));
    }

    #[test]
    fn test_contains_output_names_recurses_into_subgraphs() {
        let mut inner = ExecutionGraph::new(GraphConfig::new().with_graph_id("inner"));
        inner.add_node(stub_node("leaf", None, vec!["out"]));
        let mut outer = ExecutionGraph::new(GraphConfig::new().with_graph_id("outer"));
        outer.add_subgraph(inner);

        assert!(outer.contains_output_names(&["inner.leaf.out".to_string()]));
        assert!(!outer.contains_output_names(&["inner.leaf.nope".to_string()]));
        assert!(!outer.contains_output_names(&["other.leaf.out".to_string()]));
    }

    #[test]
    fn test_dependency_graph_shape() {
        let graph = chain_graph();
        let dependency_graph = graph.dependency_graph();
        assert_eq!(dependency_graph["external"], vec!["a"]);
        assert_eq!(dependency_graph["a"], vec!["b"]);
        assert!(dependency_graph["b"].is_empty());
    }

    #[test]
    fn test_is_valid_for_satisfied_chain() {
        assert!(chain_graph().is_valid());
    }

    #[test]
    fn test_is_valid_rejects_missing_producer() {
        let mut graph = ExecutionGraph::new(GraphConfig::new().with_graph_id("g"));
        graph.add_node(stub_node(
            "n",
            Some(vec!["nonexistent.label"]),
            vec!["out"],
        ));
        assert!(!graph.is_valid());
    }

    #[test]
    fn test_is_valid_with_subgraph_outputs() {
        let mut inner = ExecutionGraph::new(GraphConfig::new().with_graph_id("inner"));
        inner.add_node(stub_node("leaf", None, vec!["out"]));

        let mut outer = ExecutionGraph::new(GraphConfig::new().with_graph_id("outer"));
        outer.add_subgraph(inner);
        outer.add_node(stub_node(
            "consumer",
            Some(vec!["inner.leaf.out"]),
            vec!["final"],
        ));
        assert!(outer.is_valid());
    }

    #[test]
    fn test_output_node_ids_are_dependency_leaves() {
        let graph = chain_graph();
        assert_eq!(graph.output_node_ids(), Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_last_execution_result_is_none_before_any_run() {
        let graph = chain_graph();
        assert!(graph.last_execution_result(false).is_none());
        assert!(graph.last_execution_result_from_node("a").is_none());
    }

    #[tokio::test]
    async fn test_dispose_removes_members() {
        let mut graph = chain_graph();
        assert!(graph.dispose().await);
        assert!(graph.member_ids().is_empty());
    }
}
