//! Declarative graph definitions and the loader that builds them.
//!
//! A graph definition is a JSON-compatible nested mapping: a `graphType`
//! tag, a `graphInitializationConfig`, and an ordered list of `children`
//! where each child is either a node (`nodeType` +
//! `nodeInitializationConfig`) or a recursively nested graph definition.
//! Definitions round-trip through serde, so graphs whose subroutines are
//! describable declaratively can be serialized and reloaded.
//!
//! Code cannot travel in a definition; `nodeSubroutine` on the wire is a
//! handler name resolved through a caller-supplied [`SubroutineRegistry`].

use crate::error::{GraphError, Result};
use crate::graph::{ExecutionGraph, GraphConfig, GraphMember, GRAPH_TYPE_BASE};
use crate::node::external::{ExternalApiConfig, ExternalApiNode};
use crate::node::processing::{DataProcessingConfig, DataProcessingNode, Processor};
use crate::node::{GraphNode, NodeConfig, Subroutine, ValueMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Graph type tag for split-inference runners. Currently a placeholder
/// that instantiates a plain graph.
pub const GRAPH_TYPE_SPLIT_INFERENCE_RUNNER: &str = "splitInferenceRunner";

/// Graph type tag for autoregressive-inference runners. Currently a
/// placeholder that instantiates a plain graph.
pub const GRAPH_TYPE_AUTOREGRESSIVE_INFERENCE_RUNNER: &str = "autoregressiveInferenceRunner";

/// Node type tag of plain nodes.
pub const NODE_TYPE_BASE: &str = "base";
/// Node type tag of local inference runners.
pub const NODE_TYPE_LOCAL_INFERENCE_RUNNER: &str = "localInferenceRunner";
/// Node type tag of remote inference runners.
pub const NODE_TYPE_REMOTE_INFERENCE_RUNNER: &str = "remoteInferenceRunner";
/// Node type tag of external API callers.
pub const NODE_TYPE_EXTERNAL_API_CALLER: &str = "externalApiCaller";
/// Node type tag of in-process transformer runners.
pub const NODE_TYPE_TRANSFORMERJS_PROCESSOR: &str = "transformerJSProcessor";
/// Node type tag of LLM input preparers.
pub const NODE_TYPE_LLM_INPUT_PREPARER: &str = "llmInputPreparer";
/// Node type tag of greedy token-id searchers over LLM output logits.
pub const NODE_TYPE_LLM_OUTPUT_LOGITS_TO_TOKEN_ID_GREEDY_SEARCHER: &str =
    "llmOutputLogitsToTokenIdGreedySearcher";
/// Node type tag of data-processing nodes.
pub const NODE_TYPE_DATA_PROCESSING: &str = "dataProcessing";

/// True for graph type tags the loader recognizes.
pub fn is_recognized_graph_type(graph_type: &str) -> bool {
    matches!(
        graph_type,
        GRAPH_TYPE_BASE
            | GRAPH_TYPE_SPLIT_INFERENCE_RUNNER
            | GRAPH_TYPE_AUTOREGRESSIVE_INFERENCE_RUNNER
    )
}

/// True for node type tags the loader recognizes.
pub fn is_recognized_node_type(node_type: &str) -> bool {
    matches!(
        node_type,
        NODE_TYPE_BASE
            | NODE_TYPE_LOCAL_INFERENCE_RUNNER
            | NODE_TYPE_REMOTE_INFERENCE_RUNNER
            | NODE_TYPE_EXTERNAL_API_CALLER
            | NODE_TYPE_TRANSFORMERJS_PROCESSOR
            | NODE_TYPE_LLM_INPUT_PREPARER
            | NODE_TYPE_LLM_OUTPUT_LOGITS_TO_TOKEN_ID_GREEDY_SEARCHER
            | NODE_TYPE_DATA_PROCESSING
    )
}

/// Handler names to subroutines; resolves the `nodeSubroutine` field of
/// declarative definitions.
#[derive(Clone, Default)]
pub struct SubroutineRegistry {
    subroutines: HashMap<String, Subroutine>,
}

impl SubroutineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subroutine under a handler name.
    pub fn register(&mut self, name: impl Into<String>, subroutine: Subroutine) -> &mut Self {
        self.subroutines.insert(name.into(), subroutine);
        self
    }

    /// Look up a handler name.
    pub fn resolve(&self, name: &str) -> Option<Subroutine> {
        self.subroutines.get(name).cloned()
    }
}

impl std::fmt::Debug for SubroutineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubroutineRegistry")
            .field("handlers", &self.subroutines.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Top-level declarative graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDef {
    /// Graph type tag.
    pub graph_type: String,

    /// Graph-level configuration.
    pub graph_initialization_config: GraphInitDef,

    /// Ordered children: nodes and nested graph definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildDef>,
}

/// Graph-level configuration in a definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphInitDef {
    /// Graph id; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    /// Names whose values the caller supplies at execution time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_input_names: Option<Vec<String>>,
}

/// A graph child: a node definition or a nested graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildDef {
    /// A node child.
    Node(NodeDef),
    /// A nested subgraph child.
    Subgraph(GraphDef),
}

/// A node child in a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    /// Node type tag; unrecognized tags are skipped with a warning.
    pub node_type: String,

    /// Node-level configuration.
    pub node_initialization_config: NodeInitDef,
}

/// Node-level configuration in a definition. External-call fields are
/// ignored by the other node types.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInitDef {
    /// Node id; generated when absent.
    pub node_id: Option<String>,
    /// Qualified names of the inputs this node consumes.
    pub node_input_names: Option<Vec<String>>,
    /// Output labels.
    pub node_output_names: Option<Vec<String>>,
    /// Fallback values for inputs the run does not supply.
    pub node_input_names_to_default_value_map: Option<ValueMap>,
    /// Handler name resolved through the [`SubroutineRegistry`].
    pub node_subroutine: Option<String>,
    /// Whether execution errors are appended to the node's error log.
    pub node_log_errors: bool,

    /// Backend endpoint of an external API caller.
    pub endpoint_url: Option<String>,
    /// Bearer token of an external API caller.
    pub api_key: Option<String>,
    /// Whether the endpoint speaks WebSocket.
    pub is_endpoint_web_socket_url: bool,
    /// Node input name to backend field name.
    pub node_input_name_to_backend_input_name_map: Option<HashMap<String, String>>,
    /// Backend field name to node output label.
    pub backend_output_name_to_node_output_name_map: Option<HashMap<String, String>>,
    /// Values merged into every request payload.
    pub node_private_attributes_and_values: Option<ValueMap>,
    /// Per-attempt timeout in seconds.
    pub request_timeout: Option<f64>,
    /// Retries allowed after the first attempt.
    pub max_retries: Option<usize>,
    /// Delay before the first retry, in seconds.
    pub retry_delay: Option<f64>,
    /// Additional request headers.
    pub headers: Option<HashMap<String, String>>,

    /// Processing pipeline configuration.
    pub data_processing_config: Option<DataProcessingConfig>,
}

impl GraphDef {
    /// Parse a definition from an in-memory JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse a definition from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a definition from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a definition file; `.yaml`/`.yml` extensions parse
    /// as YAML, everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Structural validation: the graph type (and those of nested graphs)
    /// must be recognized.
    pub fn validate(&self) -> Result<()> {
        if !is_recognized_graph_type(&self.graph_type) {
            return Err(GraphError::Configuration(format!(
                "unknown graph type '{}'",
                self.graph_type
            )));
        }
        for child in &self.children {
            if let ChildDef::Subgraph(subgraph_def) = child {
                subgraph_def.validate()?;
            }
        }
        Ok(())
    }

    /// Instantiate the definition, resolving handler names through the
    /// registry. Children with unrecognized node types are skipped with a
    /// warning; construction problems halt loading.
    pub fn build(&self, registry: &SubroutineRegistry) -> Result<ExecutionGraph> {
        self.validate()?;

        let mut config = GraphConfig::new().with_graph_type(&self.graph_type);
        if let Some(graph_id) = &self.graph_initialization_config.graph_id {
            config = config.with_graph_id(graph_id);
        }
        if let Some(external_names) = &self.graph_initialization_config.external_input_names {
            config = config.with_external_input_names(external_names.clone());
        }
        let mut graph = ExecutionGraph::new(config);

        for child in &self.children {
            match child {
                ChildDef::Subgraph(subgraph_def) => {
                    graph.add_subgraph(subgraph_def.build(registry)?);
                }
                ChildDef::Node(node_def) => match build_node(node_def, registry)? {
                    Some(member) => {
                        graph.add_member(member);
                    }
                    None => {
                        tracing::warn!(
                            node_type = %node_def.node_type,
                            "skipping child with unrecognized node type"
                        );
                    }
                },
            }
        }
        Ok(graph)
    }
}

fn node_config_from(def: &NodeInitDef, subroutine: Option<Subroutine>) -> NodeConfig {
    NodeConfig {
        node_id: def.node_id.clone(),
        input_names: def.node_input_names.clone(),
        input_defaults: def.node_input_names_to_default_value_map.clone(),
        output_names: def.node_output_names.clone(),
        log_errors: def.node_log_errors,
        subroutine,
    }
}

fn external_config_from(def: &NodeInitDef) -> ExternalApiConfig {
    let defaults = ExternalApiConfig::default();
    ExternalApiConfig {
        endpoint_url: def.endpoint_url.clone(),
        api_key: def.api_key.clone(),
        is_websocket: def.is_endpoint_web_socket_url,
        input_name_map: def
            .node_input_name_to_backend_input_name_map
            .clone()
            .unwrap_or_default(),
        output_name_map: def
            .backend_output_name_to_node_output_name_map
            .clone()
            .unwrap_or_default(),
        private_attributes: def
            .node_private_attributes_and_values
            .clone()
            .unwrap_or_default(),
        timeout_ms: def
            .request_timeout
            .map(|seconds| (seconds * 1000.0) as u64)
            .unwrap_or(defaults.timeout_ms),
        max_retries: def.max_retries.unwrap_or(defaults.max_retries),
        initial_retry_delay_ms: def
            .retry_delay
            .map(|seconds| (seconds * 1000.0) as u64)
            .unwrap_or(defaults.initial_retry_delay_ms),
        extra_headers: def
            .headers
            .clone()
            .map(|headers| headers.into_iter().collect())
            .unwrap_or_default(),
    }
}

/// Adapt a registry subroutine into a processing-pipeline step.
fn processor_from_subroutine(subroutine: Subroutine) -> Processor {
    Arc::new(move |input: Value| {
        let inputs = match input {
            Value::Object(map) => Some(map.into_iter().collect::<ValueMap>()),
            Value::Null => None,
            other => Some(ValueMap::from([("result".to_string(), other)])),
        };
        subroutine(inputs)
    })
}

fn build_node(def: &NodeDef, registry: &SubroutineRegistry) -> Result<Option<GraphMember>> {
    let init = &def.node_initialization_config;
    let subroutine = match &init.node_subroutine {
        Some(handler_name) => Some(registry.resolve(handler_name).ok_or_else(|| {
            GraphError::Construction(format!(
                "no subroutine registered under handler name '{handler_name}'"
            ))
        })?),
        None => None,
    };
    let node_config = node_config_from(init, subroutine.clone());

    match def.node_type.as_str() {
        NODE_TYPE_EXTERNAL_API_CALLER => {
            let node = ExternalApiNode::new(node_config, external_config_from(init))
                .with_processing_config(init.data_processing_config.clone().unwrap_or_default());
            Ok(Some(GraphMember::Node(Box::new(node))))
        }
        NODE_TYPE_DATA_PROCESSING => {
            let subroutine = subroutine.ok_or_else(|| {
                GraphError::Construction(format!(
                    "data processing node '{}' requires a registered subroutine",
                    init.node_id.as_deref().unwrap_or("<generated>")
                ))
            })?;
            let node = DataProcessingNode::new(
                node_config,
                init.data_processing_config.clone().unwrap_or_default(),
                processor_from_subroutine(subroutine),
            );
            Ok(Some(GraphMember::Node(Box::new(node))))
        }
        NODE_TYPE_BASE
        | NODE_TYPE_LOCAL_INFERENCE_RUNNER
        | NODE_TYPE_REMOTE_INFERENCE_RUNNER
        | NODE_TYPE_TRANSFORMERJS_PROCESSOR
        | NODE_TYPE_LLM_INPUT_PREPARER
        | NODE_TYPE_LLM_OUTPUT_LOGITS_TO_TOKEN_ID_GREEDY_SEARCHER => {
            Ok(Some(GraphMember::Node(Box::new(GraphNode::new(node_config)?))))
        }
        _ => Ok(None),
    }
}
