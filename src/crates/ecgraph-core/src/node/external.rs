//! External API call nodes.
//!
//! An [`ExternalApiNode`] turns a graph step into a round-trip against an
//! HTTP or WebSocket backend: declared node inputs are renamed to backend
//! field names, merged with the node's private attributes into a JSON
//! payload, sent with retry/timeout policy, and the backend's reply fields
//! are renamed back into node output labels before the standard output
//! formatting runs.
//!
//! Transports sit behind the [`ApiTransport`] trait so tests can substitute
//! a scripted backend; the real implementations are [`HttpTransport`]
//! (pooled reqwest client, POST JSON) and [`WebSocketTransport`] (one text
//! frame out, one message in).

use super::processing::{DataProcessingConfig, ErrorHandlingMode, ProcessingState};
use super::{ExecutableNode, NodeCompletion, NodeConfig, NodeCore, ValueMap};
use crate::retry::{RetryPolicy, RetryState};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

/// User agent advertised by the built-in transports.
const CLIENT_USER_AGENT: &str = concat!("ecgraph-client/", env!("CARGO_PKG_VERSION"));

/// Failure classes of an external API call. All are terminal once retries
/// are exhausted.
#[derive(Error, Debug)]
pub enum ApiCallError {
    /// The node lacks a usable endpoint; no call is attempted or counted.
    #[error("invalid API configuration: {0}")]
    ConfigInvalid(String),

    /// The gathered inputs failed validation.
    #[error("invalid API inputs: {0}")]
    InputInvalid(String),

    /// An attempt exceeded the configured timeout.
    #[error("request timed out after {duration_ms}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        duration_ms: u64,
    },

    /// The connection failed or broke mid-exchange.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body text.
        body: String,
    },

    /// The reply could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// A transport-level reply: the HTTP status when the transport has one,
/// plus the decoded body.
#[derive(Debug, Clone)]
pub struct TransportReply {
    /// HTTP status code; `None` for WebSocket exchanges.
    pub status: Option<u16>,
    /// Decoded reply body.
    pub body: Value,
}

/// One request/reply exchange against a backend.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Send `payload` to `endpoint` and return the decoded reply.
    async fn round_trip(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, ApiCallError>;
}

/// HTTP transport: POST JSON over a pooled client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn round_trip(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, ApiCallError> {
        let mut request = self.client.post(endpoint).timeout(timeout).json(payload);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiCallError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                }
            } else {
                ApiCallError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ApiCallError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(ApiCallError::Status {
                code: status.as_u16(),
                body: body_text,
            });
        }
        let body = serde_json::from_str(&body_text)
            .map_err(|e| ApiCallError::Decode(e.to_string()))?;
        Ok(TransportReply {
            status: Some(status.as_u16()),
            body,
        })
    }
}

/// Translate an HTTP endpoint into its WebSocket counterpart; other
/// schemes pass through unchanged.
fn translate_ws_scheme(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        return format!("ws://{rest}");
    }
    if let Some(rest) = endpoint.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    endpoint.to_string()
}

/// WebSocket transport: connect, send one JSON text frame, read one reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl ApiTransport for WebSocketTransport {
    async fn round_trip(
        &self,
        endpoint: &str,
        headers: &[(String, String)],
        payload: &Value,
        timeout: Duration,
    ) -> Result<TransportReply, ApiCallError> {
        let ws_url = translate_ws_scheme(endpoint);
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| ApiCallError::ConfigInvalid(e.to_string()))?;
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                request.headers_mut().insert(name, value);
            }
        }
        let text = serde_json::to_string(payload)
            .map_err(|e| ApiCallError::Decode(e.to_string()))?;

        let exchange = async {
            let (mut stream, _) = connect_async(request)
                .await
                .map_err(|e| ApiCallError::Transport(e.to_string()))?;
            stream
                .send(Message::Text(text))
                .await
                .map_err(|e| ApiCallError::Transport(e.to_string()))?;
            let reply = stream
                .next()
                .await
                .ok_or_else(|| {
                    ApiCallError::Transport("connection closed before reply".to_string())
                })?
                .map_err(|e| ApiCallError::Transport(e.to_string()))?;
            match reply {
                Message::Text(raw) => {
                    let body = serde_json::from_str(&raw)
                        .unwrap_or_else(|_| json!({ "response": raw }));
                    Ok(body)
                }
                other => Err(ApiCallError::Transport(format!(
                    "unexpected non-text reply: {other:?}"
                ))),
            }
        };

        let body = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ApiCallError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })??;
        Ok(TransportReply { status: None, body })
    }
}

/// Endpoint and policy configuration of an external API call node.
#[derive(Clone, Debug)]
pub struct ExternalApiConfig {
    /// Backend endpoint: absolute `http(s)`/`ws(s)` URL or `/`-rooted path.
    pub endpoint_url: Option<String>,
    /// Bearer token added to the `Authorization` header when set.
    pub api_key: Option<String>,
    /// Whether the endpoint speaks WebSocket instead of HTTP.
    pub is_websocket: bool,
    /// Node input name to backend field name; unmapped names pass through.
    pub input_name_map: HashMap<String, String>,
    /// Backend field name to node output label; unmapped names pass through.
    pub output_name_map: HashMap<String, String>,
    /// Values merged into every request payload; they win on key conflicts.
    pub private_attributes: ValueMap,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries allowed after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubles each attempt.
    pub initial_retry_delay_ms: u64,
    /// Additional request headers.
    pub extra_headers: Vec<(String, String)>,
}

impl Default for ExternalApiConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            api_key: None,
            is_websocket: false,
            input_name_map: HashMap::new(),
            output_name_map: HashMap::new(),
            private_attributes: ValueMap::new(),
            timeout_ms: 30_000,
            max_retries: 3,
            initial_retry_delay_ms: 1_000,
            extra_headers: Vec::new(),
        }
    }
}

impl ExternalApiConfig {
    /// Configuration pointing at `endpoint_url` with default policy.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: Some(endpoint_url.into()),
            ..Self::default()
        }
    }
}

/// Counters describing a node's API call history.
#[derive(Debug, Clone, Default)]
pub struct ApiStats {
    /// Executions that reached the call stage.
    pub calls: u64,
    /// Attempts that received a usable reply.
    pub successes: u64,
    /// Attempts that failed (each retry counts).
    pub failures: u64,
    /// Duration of the most recent attempt in milliseconds.
    pub last_latency_ms: f64,
    /// Status code of the most recent HTTP reply.
    pub last_status: Option<u16>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
}

/// A node that calls an HTTP or WebSocket backend.
pub struct ExternalApiNode {
    core: NodeCore,
    processing: ProcessingState,
    config: ExternalApiConfig,
    stats: ApiStats,
    transport: Arc<dyn ApiTransport>,
}

impl ExternalApiNode {
    /// Build an external call node; the transport follows
    /// `config.is_websocket`.
    pub fn new(node_config: NodeConfig, config: ExternalApiConfig) -> Self {
        let transport: Arc<dyn ApiTransport> = if config.is_websocket {
            Arc::new(WebSocketTransport)
        } else {
            Arc::new(HttpTransport::new())
        };
        Self {
            core: NodeCore::new(&node_config),
            processing: ProcessingState::default(),
            config,
            stats: ApiStats::default(),
            transport,
        }
    }

    /// Override the processing pipeline configuration.
    pub fn with_processing_config(mut self, config: DataProcessingConfig) -> Self {
        self.processing = ProcessingState::new(config);
        self
    }

    /// Substitute the transport. Primarily a test seam.
    pub fn with_transport(mut self, transport: Arc<dyn ApiTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Call counters.
    pub fn stats(&self) -> &ApiStats {
        &self.stats
    }

    /// Processing state and statistics.
    pub fn processing(&self) -> &ProcessingState {
        &self.processing
    }

    /// Endpoint and policy configuration.
    pub fn config(&self) -> &ExternalApiConfig {
        &self.config
    }

    /// Diagnostic summary combining processing and API counters.
    pub fn api_statistics(&self) -> Value {
        let mut stats = self.processing.statistics(&self.core);
        let success_rate = if self.stats.calls > 0 {
            self.stats.successes as f64 / self.stats.calls as f64
        } else {
            0.0
        };
        let api = json!({
            "api_call_count": self.stats.calls,
            "successful_calls": self.stats.successes,
            "failed_calls": self.stats.failures,
            "success_rate": success_rate,
            "last_response_time_ms": self.stats.last_latency_ms,
            "last_status_code": self.stats.last_status,
            "last_error_message": self.stats.last_error,
            "endpoint_url": self.config.endpoint_url,
            "is_websocket": self.config.is_websocket,
        });
        if let (Some(stats), Some(api)) = (stats.as_object_mut(), api.as_object()) {
            for (key, value) in api {
                stats.insert(key.clone(), value.clone());
            }
        }
        stats
    }

    /// Clear processing statistics and API counters.
    pub fn reset_api_statistics(&mut self) {
        self.processing.reset();
        self.stats = ApiStats::default();
    }

    fn validate_configuration(&self) -> Result<&str, ApiCallError> {
        let endpoint = self
            .config
            .endpoint_url
            .as_deref()
            .filter(|url| ecgraph_utils::is_non_empty_string(url))
            .ok_or_else(|| {
                ApiCallError::ConfigInvalid("missing or empty endpoint URL".to_string())
            })?;
        if !ecgraph_utils::is_url(endpoint) {
            return Err(ApiCallError::ConfigInvalid(format!(
                "invalid endpoint URL format: '{endpoint}'"
            )));
        }
        Ok(endpoint)
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), CLIENT_USER_AGENT.to_string()),
        ];
        if let Some(api_key) = &self.config.api_key {
            headers.push(("Authorization".to_string(), format!("Bearer {api_key}")));
        }
        headers.extend(self.config.extra_headers.iter().cloned());
        headers
    }

    fn map_inputs(&self, inputs: &ValueMap) -> ValueMap {
        inputs
            .iter()
            .map(|(name, value)| {
                let backend_name = self
                    .config
                    .input_name_map
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| name.clone());
                (backend_name, value.clone())
            })
            .collect()
    }

    fn build_payload(&self, backend_inputs: ValueMap) -> Value {
        let mut payload: serde_json::Map<String, Value> =
            backend_inputs.into_iter().collect();
        for (name, value) in &self.config.private_attributes {
            payload.insert(name.clone(), value.clone());
        }
        Value::Object(payload)
    }

    fn map_outputs(&self, response: Value) -> Value {
        let Value::Object(fields) = response else {
            return response;
        };
        let mapped = fields
            .into_iter()
            .map(|(backend_name, value)| {
                let label = self
                    .config
                    .output_name_map
                    .get(&backend_name)
                    .cloned()
                    .unwrap_or(backend_name);
                (label, value)
            })
            .collect();
        Value::Object(mapped)
    }

    async fn call_with_retries(
        &mut self,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Value, ApiCallError> {
        let headers = self.request_headers();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let policy = RetryPolicy::new(self.config.max_retries + 1)
            .with_initial_delay_ms(self.config.initial_retry_delay_ms);
        let mut retry_state = RetryState::new();

        loop {
            let attempt = retry_state.attempts;
            let attempt_started = Instant::now();
            let outcome = self
                .transport
                .round_trip(endpoint, &headers, payload, timeout)
                .await;
            self.stats.last_latency_ms = attempt_started.elapsed().as_secs_f64() * 1000.0;

            match outcome {
                Ok(reply) => {
                    self.stats.successes += 1;
                    if reply.status.is_some() {
                        self.stats.last_status = reply.status;
                    }
                    return Ok(reply.body);
                }
                Err(error) => {
                    self.stats.failures += 1;
                    if let ApiCallError::Status { code, .. } = &error {
                        self.stats.last_status = Some(*code);
                    }
                    retry_state.record_attempt(Some(error.to_string()));
                    tracing::warn!(
                        node_id = %self.core.node_id,
                        endpoint,
                        attempt,
                        error = %error,
                        "external API attempt failed"
                    );
                    if !policy.should_retry(retry_state.attempts) {
                        return Err(error);
                    }
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for ExternalApiNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalApiNode")
            .field("core", &self.core)
            .field("endpoint_url", &self.config.endpoint_url)
            .field("is_websocket", &self.config.is_websocket)
            .field("stats", &self.stats)
            .finish()
    }
}

#[async_trait]
impl ExecutableNode for ExternalApiNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn execute(&mut self, inputs: Option<ValueMap>, measure_time: bool) -> bool {
        let started = measure_time.then(Instant::now);

        let endpoint = match self.validate_configuration() {
            Ok(endpoint) => endpoint.to_string(),
            Err(error) => {
                let message = error.to_string();
                self.stats.last_error = Some(message.clone());
                self.processing.record_error(message.clone());
                self.core.record_failure(message, started);
                return false;
            }
        };

        if !self.processing.input_is_acceptable(inputs.as_ref())
            && self.processing.config.error_handling_mode == ErrorHandlingMode::Strict
        {
            let error = ApiCallError::InputInvalid(format!(
                "input validation failed for node '{}'",
                self.core.node_id
            ));
            let message = error.to_string();
            self.stats.last_error = Some(message.clone());
            self.processing.record_error(message.clone());
            self.core.record_failure(message, started);
            return false;
        }

        self.stats.calls += 1;

        let backend_inputs = self.map_inputs(&inputs.unwrap_or_default());
        let payload = self.build_payload(backend_inputs);
        self.processing.set_metadata(json!({
            "api_call_count": self.stats.calls,
            "endpoint_url": endpoint,
            "is_websocket": self.config.is_websocket,
            "request_payload_size": payload.to_string().len(),
        }));

        match self.call_with_retries(&endpoint, &payload).await {
            Ok(response) => {
                let outputs = self.map_outputs(response);
                let formatted = self.processing.format_output(&self.core.node_id, outputs);
                self.stats.last_error = None;
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
            Err(error) => {
                let message = format!(
                    "error executing external API call node '{}': {}",
                    self.core.node_id, error
                );
                self.stats.last_error = Some(error.to_string());
                self.processing.record_error(message.clone());
                self.core.record_failure(message, started);
                false
            }
        }
    }
}
