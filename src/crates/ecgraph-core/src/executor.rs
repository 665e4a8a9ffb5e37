//! The run loop.
//!
//! Executing a graph resolves a topological order over the dependency
//! graph, seeds the per-run value cache from the caller-supplied external
//! inputs, and walks the order as a single sequential task: nested
//! subgraphs run on demand as one unit, plain nodes receive their gathered
//! inputs, and the first failure aborts the walk. The success flag selects
//! the graph's success or error callback.
//!
//! Everything a run mutates (the executed set, the value cache, node
//! histories) is owned exclusively by the running task, so no locks are
//! held across suspension points.

use crate::algo::{self, NodeId};
use crate::error::{GraphError, Result};
use crate::graph::{ExecutionGraph, GraphMember};
use crate::names;
use crate::node::ValueMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use tracing::Instrument;

/// Caller-supplied configuration for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Values for the graph's declared external inputs, keyed by qualified
    /// name.
    #[serde(
        rename = "externalInputNamesToValuesDict",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_input_values: Option<ValueMap>,
}

impl ExecutionConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for one external input name.
    pub fn with_external_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.external_input_values
            .get_or_insert_with(ValueMap::new)
            .insert(name.into(), value);
        self
    }
}

impl ExecutionGraph {
    /// Execute the graph.
    ///
    /// Returns `Ok(true)` when every node ran successfully, `Ok(false)`
    /// when a node or subgraph reported failure (after awaiting the error
    /// callback), and `Err` when the run could not start or a declared
    /// input could not be resolved mid-run.
    ///
    /// The future is boxed because nested subgraphs recurse into the same
    /// entry point.
    pub fn execute(
        &mut self,
        config: Option<ExecutionConfig>,
        measure_time: bool,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let span = tracing::info_span!("execute_graph", graph_id = %self.graph_id());
        Box::pin(
            async move {
                tracing::info!(member_count = self.members.len(), "starting graph execution");
                self.execution_config = config.clone();

                let dependency_graph = self.dependency_graph();
                self.last_dep_graph = Some(dependency_graph.clone());
                let Some(execution_order) = algo::topological_sort(&dependency_graph) else {
                    return Err(GraphError::Validation(format!(
                        "no execution order for graph '{}': dependency graph is empty or cyclic",
                        self.graph_id()
                    )));
                };
                tracing::debug!(?execution_order, "resolved execution order");

                let external_ids = self.external_node_ids().unwrap_or_default();
                let mut executed: BTreeSet<NodeId> = BTreeSet::new();
                let mut seeded_values = ValueMap::new();
                if let (Some(config), Some(declared)) =
                    (&config, &self.external_input_names)
                {
                    if let Some(values) = &config.external_input_values {
                        for (name, value) in values {
                            if declared.contains(name) {
                                seeded_values.insert(name.clone(), value.clone());
                                if let Some(node_id) = names::node_id_of(name) {
                                    executed.insert(node_id);
                                }
                            }
                        }
                    }
                }
                self.external_values = Some(seeded_values);

                if !self.is_valid() {
                    return Err(GraphError::dependency_closure(format!(
                        "graph '{}' is not valid: most likely due to missing dependencies",
                        self.graph_id()
                    )));
                }

                let mut executed_subgraphs: BTreeSet<String> = BTreeSet::new();
                let mut run_succeeded = true;

                for current_id in execution_order {
                    if external_ids.contains(&current_id) {
                        continue;
                    }

                    if names::has_subgraph_prefix(&current_id) {
                        let Some((subgraph_id, _)) = names::split_subgraph(&current_id) else {
                            continue;
                        };
                        let subgraph_id = subgraph_id.to_string();
                        if !executed_subgraphs.contains(&subgraph_id) {
                            let subgraph_config = config.clone();
                            let graph_id = self.graph_id().to_string();
                            let Some(GraphMember::Subgraph(subgraph)) =
                                self.get_mut(&subgraph_id)
                            else {
                                return Err(GraphError::Execution(format!(
                                    "'{subgraph_id}' is not a subgraph of graph '{graph_id}'"
                                )));
                            };
                            if !subgraph.execute(subgraph_config, measure_time).await? {
                                run_succeeded = false;
                                break;
                            }
                            executed_subgraphs.insert(subgraph_id);
                        }
                        executed.insert(current_id);
                        continue;
                    }

                    let gathered_inputs = {
                        let Some(GraphMember::Node(node)) = self.get(&current_id) else {
                            return Err(GraphError::Execution(format!(
                                "no member '{}' in graph '{}'",
                                current_id,
                                self.graph_id()
                            )));
                        };
                        match node.input_names() {
                            None => None,
                            Some([]) => None,
                            Some(input_names) => Some(self.gather_input_values(
                                input_names,
                                node.input_defaults(),
                                &executed,
                            )?),
                        }
                    };

                    tracing::debug!(node_id = %current_id, "executing node");
                    let Some(GraphMember::Node(node)) = self.get_mut(&current_id) else {
                        unreachable!("member presence checked above");
                    };
                    if !node.execute(gathered_inputs, measure_time).await {
                        run_succeeded = false;
                        break;
                    }
                    executed.insert(current_id);
                }

                if run_succeeded {
                    tracing::info!("graph execution completed successfully");
                    if let Some(callback) = self.success_callback.clone() {
                        callback(&*self).await;
                    }
                } else {
                    tracing::warn!("graph execution failed");
                    if let Some(callback) = self.error_callback.clone() {
                        callback(&*self).await;
                    }
                }
                Ok(run_succeeded)
            }
            .instrument(span),
        )
    }

    /// Resolve values for a node's declared inputs.
    ///
    /// Per name, in order: the run's external-input seeds, the node's
    /// declared defaults, then the producing node's last result (crossing
    /// one subgraph boundary when the producer id is qualified). Gathered
    /// values are keyed by the declared input name.
    fn gather_input_values(
        &self,
        input_names: &[String],
        input_defaults: Option<&ValueMap>,
        executed: &BTreeSet<NodeId>,
    ) -> Result<ValueMap> {
        let mut gathered = ValueMap::new();
        for name in input_names {
            if let Some(value) = self
                .external_values
                .as_ref()
                .and_then(|values| values.get(name))
            {
                gathered.insert(name.clone(), value.clone());
                continue;
            }
            if let Some(default) = input_defaults.and_then(|defaults| defaults.get(name)) {
                gathered.insert(name.clone(), default.clone());
                continue;
            }

            let Some(producer_id) = names::node_id_of(name) else {
                return Err(GraphError::dependency_closure(format!(
                    "input name '{name}' is not a valid qualified name"
                )));
            };
            let Some(label) = names::output_label_of(name) else {
                return Err(GraphError::dependency_closure(format!(
                    "input name '{name}' has no output label"
                )));
            };
            if !executed.contains(&producer_id) {
                return Err(GraphError::Execution(format!(
                    "node '{producer_id}' is not in the set of executed nodes"
                )));
            }

            let producer_result = if names::has_subgraph_prefix(&producer_id) {
                let Some((subgraph_id, inner_node_id)) = names::split_subgraph(&producer_id)
                else {
                    return Err(GraphError::Execution(format!(
                        "cannot split subgraph reference '{producer_id}'"
                    )));
                };
                let Some(GraphMember::Subgraph(subgraph)) = self.members.get(subgraph_id) else {
                    return Err(GraphError::Execution(format!(
                        "'{subgraph_id}' is not a subgraph of graph '{}'",
                        self.graph_id()
                    )));
                };
                subgraph
                    .last_execution_result_from_node(inner_node_id)
                    .ok_or_else(|| {
                        GraphError::Execution(format!(
                            "result '{name}' could not be obtained from subgraph '{subgraph_id}'"
                        ))
                    })?
            } else {
                let Some(GraphMember::Node(producer)) = self.members.get(&producer_id) else {
                    return Err(GraphError::Execution(format!(
                        "no member '{producer_id}' in graph '{}'",
                        self.graph_id()
                    )));
                };
                producer
                    .last_result()
                    .ok_or_else(|| {
                        GraphError::Execution(format!(
                            "node '{producer_id}' has not been executed yet"
                        ))
                    })?
                    .clone()
            };

            let Some(value) = producer_result.get(label) else {
                return Err(GraphError::Execution(format!(
                    "node '{producer_id}' has not produced the output '{name}'"
                )));
            };
            gathered.insert(name.clone(), value.clone());
        }
        Ok(gathered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphConfig;
    use serde_json::json;

    #[test]
    fn test_execution_config_wire_format() {
        let config: ExecutionConfig = serde_json::from_value(json!({
            "externalInputNamesToValuesDict": { "external.text": "hello" }
        }))
        .unwrap();
        let values = config.external_input_values.unwrap();
        assert_eq!(values["external.text"], json!("hello"));
    }

    #[test]
    fn test_execution_config_builder_round_trips() {
        let config = ExecutionConfig::new().with_external_input("external.text", json!("x"));
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(
            encoded["externalInputNamesToValuesDict"]["external.text"],
            json!("x")
        );
        let decoded: ExecutionConfig = serde_json::from_value(encoded).unwrap();
        assert_eq!(
            decoded.external_input_values.unwrap()["external.text"],
            json!("x")
        );
    }

    #[tokio::test]
    async fn test_empty_graph_has_no_execution_order() {
        let mut graph = ExecutionGraph::new(GraphConfig::new().with_graph_id("empty"));
        let err = graph.execute(None, true).await.unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }
}
