//! Data-processing nodes.
//!
//! A [`DataProcessingNode`] replaces the plain subroutine call with a hook
//! pipeline:
//!
//! ```text
//! validate input → pre-process hook → process → post-process hook → format output
//! ```
//!
//! The processing step is an injected async closure; the hooks are optional
//! synchronous transforms. The default output formatter normalizes whatever
//! the pipeline produced into a result map and attaches processing metadata.

use super::{
    wrap_result_value, ExecutableNode, NodeCompletion, NodeConfig, NodeCore, SubroutineFuture,
    ValueMap,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// The processing step: input data in, processed data out.
pub type Processor = Arc<dyn Fn(Value) -> SubroutineFuture + Send + Sync>;

/// Transform applied to the input data before processing.
pub type PreProcessHook = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Transform applied to the processed data; also receives the original
/// input.
pub type PostProcessHook = Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>;

/// How a processing node reacts to input that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandlingMode {
    /// Invalid input fails the execution.
    #[default]
    Strict,
    /// Invalid input is tolerated and processing continues.
    Lenient,
}

/// Configuration for the processing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataProcessingConfig {
    /// Whether incoming values are validated before processing.
    pub input_validation_enabled: bool,

    /// Whether outgoing values pass through the standard formatter.
    pub output_formatting_enabled: bool,

    /// Reaction to validation failures.
    pub error_handling_mode: ErrorHandlingMode,
}

impl Default for DataProcessingConfig {
    fn default() -> Self {
        Self {
            input_validation_enabled: true,
            output_formatting_enabled: true,
            error_handling_mode: ErrorHandlingMode::Strict,
        }
    }
}

/// Pipeline configuration plus per-node processing statistics. Shared by
/// the data-processing and external-call variants.
#[derive(Debug, Clone, Default)]
pub struct ProcessingState {
    /// Pipeline configuration.
    pub config: DataProcessingConfig,

    /// Number of successfully processed executions.
    pub processed_count: u64,

    /// Errors raised by the pipeline, oldest first.
    pub processing_errors: Vec<String>,

    /// Metadata attached to the most recent formatted output.
    pub last_metadata: Option<Value>,
}

impl ProcessingState {
    /// Create processing state from pipeline configuration.
    pub fn new(config: DataProcessingConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Whether the given inputs pass validation. Absent input is the only
    /// rejectable shape at this boundary; gathered inputs are mappings by
    /// construction.
    pub fn input_is_acceptable(&self, inputs: Option<&ValueMap>) -> bool {
        if !self.config.input_validation_enabled {
            return true;
        }
        inputs.is_some()
    }

    /// Record metadata to attach to the next formatted output.
    pub fn set_metadata(&mut self, metadata: Value) {
        self.last_metadata = Some(metadata);
    }

    /// Normalize processed data into a result map.
    ///
    /// Objects merge through unchanged; sequences become
    /// `{"items": [...], "count": n}`; scalars become `{"result": v}`.
    /// When formatting is enabled the stored metadata and a
    /// `processing_stats` record are attached.
    pub fn format_output(&self, node_id: &str, processed: Value) -> ValueMap {
        if !self.config.output_formatting_enabled {
            return wrap_result_value(processed);
        }
        let mut output = match processed {
            Value::Object(map) => map.into_iter().collect::<ValueMap>(),
            Value::Array(items) => ValueMap::from([
                ("count".to_string(), json!(items.len())),
                ("items".to_string(), Value::Array(items)),
            ]),
            other => ValueMap::from([("result".to_string(), other)]),
        };
        if let Some(metadata) = &self.last_metadata {
            output.insert("metadata".to_string(), metadata.clone());
        }
        output.insert(
            "processing_stats".to_string(),
            json!({
                "processed_count": self.processed_count,
                "node_id": node_id,
                "processing_timestamp": ecgraph_utils::current_timestamp_ms(),
            }),
        );
        output
    }

    /// Record a pipeline error message.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.processing_errors.push(message.into());
    }

    /// Summary of processing activity for diagnostics.
    pub fn statistics(&self, core: &NodeCore) -> Value {
        let recent_start = self.processing_errors.len().saturating_sub(5);
        json!({
            "node_id": core.node_id,
            "processed_count": self.processed_count,
            "processing_errors_count": self.processing_errors.len(),
            "recent_errors": self.processing_errors[recent_start..],
            "last_metadata": self.last_metadata,
            "average_execution_time_ms": core.average_execution_time_ms(5),
            "last_execution_time_ms": core.last_execution_time_ms(),
        })
    }

    /// Clear counters, errors, and metadata.
    pub fn reset(&mut self) {
        self.processed_count = 0;
        self.processing_errors.clear();
        self.last_metadata = None;
    }
}

/// A node whose execution runs the validate/hook/format pipeline around an
/// injected async processor.
pub struct DataProcessingNode {
    core: NodeCore,
    processing: ProcessingState,
    processor: Processor,
    pre_hook: Option<PreProcessHook>,
    post_hook: Option<PostProcessHook>,
}

impl DataProcessingNode {
    /// Build a processing node from node configuration, pipeline
    /// configuration, and the processing step.
    pub fn new(
        config: NodeConfig,
        processing_config: DataProcessingConfig,
        processor: Processor,
    ) -> Self {
        Self {
            core: NodeCore::new(&config),
            processing: ProcessingState::new(processing_config),
            processor,
            pre_hook: None,
            post_hook: None,
        }
    }

    /// Install a pre-processing hook.
    pub fn with_pre_hook(mut self, hook: PreProcessHook) -> Self {
        self.pre_hook = Some(hook);
        self
    }

    /// Install a post-processing hook.
    pub fn with_post_hook(mut self, hook: PostProcessHook) -> Self {
        self.post_hook = Some(hook);
        self
    }

    /// Processing state and statistics.
    pub fn processing(&self) -> &ProcessingState {
        &self.processing
    }

    /// Processing state, mutably (metadata, resets).
    pub fn processing_mut(&mut self) -> &mut ProcessingState {
        &mut self.processing
    }

    /// Diagnostic summary of processing activity.
    pub fn processing_statistics(&self) -> Value {
        self.processing.statistics(&self.core)
    }
}

impl std::fmt::Debug for DataProcessingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProcessingNode")
            .field("core", &self.core)
            .field("processing", &self.processing)
            .finish()
    }
}

#[async_trait]
impl ExecutableNode for DataProcessingNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn execute(&mut self, inputs: Option<ValueMap>, measure_time: bool) -> bool {
        let started = measure_time.then(Instant::now);

        if !self.processing.input_is_acceptable(inputs.as_ref())
            && self.processing.config.error_handling_mode == ErrorHandlingMode::Strict
        {
            let message = format!(
                "input validation failed for node '{}'",
                self.core.node_id
            );
            self.processing.record_error(message.clone());
            self.core.record_failure(message, started);
            return false;
        }

        let input_value = Value::Object(
            inputs
                .unwrap_or_default()
                .into_iter()
                .collect::<serde_json::Map<_, _>>(),
        );
        let preprocessed = match &self.pre_hook {
            Some(hook) => hook(input_value.clone()),
            None => input_value.clone(),
        };

        let processed = match (self.processor)(preprocessed).await {
            Ok(value) => value,
            Err(error) => {
                let message = format!(
                    "error executing data processing node '{}': {}",
                    self.core.node_id, error
                );
                self.processing.record_error(message.clone());
                self.core.record_failure(message, started);
                return false;
            }
        };

        let finalized = match &self.post_hook {
            Some(hook) => hook(processed, &input_value),
            None => processed,
        };

        let formatted = self.processing.format_output(&self.core.node_id, finalized);
        self.core.record_success(formatted.clone(), started);
        self.processing.processed_count += 1;

        if let Some(callback) = self.core.on_complete.clone() {
            callback(NodeCompletion {
                node_id: self.core.node_id.clone(),
                result: formatted,
            })
            .await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BoxError;

    fn passthrough_processor() -> Processor {
        Arc::new(|input| Box::pin(async move { Ok(input) }))
    }

    fn node_with(config: DataProcessingConfig) -> DataProcessingNode {
        DataProcessingNode::new(
            NodeConfig::new().with_node_id("proc").with_output_names(["out"]),
            config,
            passthrough_processor(),
        )
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_missing_input() {
        let mut node = node_with(DataProcessingConfig::default());
        assert!(!node.execute(None, true).await);
        assert_eq!(node.execution_successes(), [false]);
        assert_eq!(node.processing().processing_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_mode_progresses_on_missing_input() {
        let mut node = node_with(DataProcessingConfig {
            error_handling_mode: ErrorHandlingMode::Lenient,
            ..DataProcessingConfig::default()
        });
        assert!(node.execute(None, true).await);
        assert_eq!(node.processing().processed_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_validation_accepts_missing_input() {
        let mut node = node_with(DataProcessingConfig {
            input_validation_enabled: false,
            ..DataProcessingConfig::default()
        });
        assert!(node.execute(None, true).await);
    }

    #[tokio::test]
    async fn test_object_results_merge_through() {
        let mut node = node_with(DataProcessingConfig::default());
        let inputs = ValueMap::from([("a.x".to_string(), json!("payload"))]);
        assert!(node.execute(Some(inputs), true).await);
        let result = node.last_result().unwrap();
        assert_eq!(result["a.x"], json!("payload"));
        assert_eq!(result["processing_stats"]["node_id"], json!("proc"));
        assert_eq!(result["processing_stats"]["processed_count"], json!(0));
    }

    #[tokio::test]
    async fn test_sequence_results_become_items_and_count() {
        let mut node = DataProcessingNode::new(
            NodeConfig::new().with_node_id("seq"),
            DataProcessingConfig::default(),
            Arc::new(|_| Box::pin(async { Ok(json!([1, 2, 3])) })),
        );
        assert!(node.execute(Some(ValueMap::new()), true).await);
        let result = node.last_result().unwrap();
        assert_eq!(result["items"], json!([1, 2, 3]));
        assert_eq!(result["count"], json!(3));
    }

    #[tokio::test]
    async fn test_scalar_results_are_wrapped() {
        let mut node = DataProcessingNode::new(
            NodeConfig::new().with_node_id("scalar"),
            DataProcessingConfig::default(),
            Arc::new(|_| Box::pin(async { Ok(json!(7)) })),
        );
        assert!(node.execute(Some(ValueMap::new()), true).await);
        assert_eq!(node.last_result().unwrap()["result"], json!(7));
    }

    #[tokio::test]
    async fn test_formatting_disabled_skips_stats() {
        let mut node = node_with(DataProcessingConfig {
            output_formatting_enabled: false,
            ..DataProcessingConfig::default()
        });
        assert!(node.execute(Some(ValueMap::new()), true).await);
        assert!(!node.last_result().unwrap().contains_key("processing_stats"));
    }

    #[tokio::test]
    async fn test_metadata_is_attached() {
        let mut node = node_with(DataProcessingConfig::default());
        node.processing_mut().set_metadata(json!({"source": "unit"}));
        assert!(node.execute(Some(ValueMap::new()), true).await);
        assert_eq!(
            node.last_result().unwrap()["metadata"],
            json!({"source": "unit"})
        );
    }

    #[tokio::test]
    async fn test_hooks_wrap_the_processor() {
        let mut node = DataProcessingNode::new(
            NodeConfig::new().with_node_id("hooked"),
            DataProcessingConfig::default(),
            Arc::new(|input| {
                Box::pin(async move {
                    let n = input["n"].as_i64().unwrap_or(0);
                    Ok(json!({"n": n * 10}))
                })
            }),
        )
        .with_pre_hook(Arc::new(|input| {
            let n = input["seed"].as_i64().unwrap_or(0);
            json!({"n": n + 1})
        }))
        .with_post_hook(Arc::new(|processed, original| {
            let n = processed["n"].as_i64().unwrap_or(0);
            json!({"n": n, "seed": original["seed"]})
        }));

        let inputs = ValueMap::from([("seed".to_string(), json!(4))]);
        assert!(node.execute(Some(inputs), true).await);
        let result = node.last_result().unwrap();
        assert_eq!(result["n"], json!(50));
        assert_eq!(result["seed"], json!(4));
    }

    #[tokio::test]
    async fn test_processor_error_is_recorded() {
        let mut node = DataProcessingNode::new(
            NodeConfig::new().with_node_id("bad").with_log_errors(true),
            DataProcessingConfig::default(),
            Arc::new(|_| Box::pin(async { Err::<Value, BoxError>("cannot parse".into()) })),
        );
        assert!(!node.execute(Some(ValueMap::new()), true).await);
        assert_eq!(node.execution_successes(), [false]);
        assert!(node.logged_errors()[0].contains("cannot parse"));
        assert_eq!(node.processing().processing_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics_and_reset() {
        let mut node = node_with(DataProcessingConfig::default());
        node.execute(Some(ValueMap::new()), true).await;
        let stats = node.processing_statistics();
        assert_eq!(stats["processed_count"], json!(1));
        assert_eq!(stats["node_id"], json!("proc"));

        node.processing_mut().reset();
        assert_eq!(node.processing().processed_count, 0);
        assert!(node.processing().processing_errors.is_empty());
    }
}
