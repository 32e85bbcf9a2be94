//! Vision Language Model (VLM) client with streaming support.
//!
//! Provides the inference boundary used by the structure analyzer and the
//! self-correction loop:
//! - [`InferenceClient`], the seam every caller depends on
//! - [`VlmClient`], an OpenAI-compatible chat completions client with
//!   streaming responses (activity-based timeout, no total timeout)
//! - Connection health checks
//! - Progress callbacks for long-running inference
//!
//! # Configuration
//!
//! Defaults come from [`crate::config`]:
//! - `CRAWLER_SYNTH_VLM_ENDPOINT`: API endpoint URL
//! - `CRAWLER_SYNTH_VLM_MODEL`: Model name
//! - `CRAWLER_SYNTH_VLM_API_KEY`: Optional bearer token
//! - `CRAWLER_SYNTH_VLM_TIMEOUT`: Activity timeout (seconds)
//! - `CRAWLER_SYNTH_VLM_CONNECT_TIMEOUT`: Connection timeout (seconds)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::config;

/// Result type for VLM operations
pub type VlmResult<T> = Result<T, VlmError>;

/// Errors that can occur during VLM operations
#[derive(Debug, thiserror::Error)]
pub enum VlmError {
    /// Failed to connect to the VLM endpoint
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// No activity for too long during streaming
    #[error("No response for {0:?}")]
    ActivityTimeout(Duration),
    /// Endpoint answered with a non-success status
    #[error("Endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Invalid response from the VLM
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// Endpoint URL could not be parsed
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    /// Transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration for VLM client
#[derive(Debug, Clone)]
pub struct VlmConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
}

impl Default for VlmConfig {
    fn default() -> Self {
        config::Config::defaults().vlm_config()
    }
}

impl VlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }
}

/// A base64-encoded image attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Base64 payload without the `data:` prefix
    pub data: String,
}

impl ImageAttachment {
    pub fn png(data: impl Into<String>) -> Self {
        Self {
            media_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// One inference call: prompt text, optional images and decoding parameters
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub images: Vec<ImageAttachment>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl InferenceRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            temperature: config::DEFAULT_VLM_TEMPERATURE,
            max_tokens: config::DEFAULT_VLM_MAX_TOKENS,
        }
    }

    pub fn image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Progress update during VLM inference
#[derive(Debug, Clone)]
pub enum VlmProgress {
    /// Connection established
    Connected,
    /// Receiving data (partial content so far)
    Receiving(String),
    /// Inference complete
    Complete(String),
    /// Error occurred
    Error(String),
}

/// The inference boundary. Implementations return the raw model text;
/// callers own all parsing of it.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest) -> VlmResult<String>;
}

/// Callback receiving progress of every request made through [`InferenceClient`]
pub type ProgressHandler = Arc<dyn Fn(VlmProgress) + Send + Sync>;

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct VlmClient {
    config: VlmConfig,
    http: reqwest::Client,
    progress: Option<ProgressHandler>,
}

impl fmt::Debug for VlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmClient")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl VlmClient {
    pub fn new(config: VlmConfig) -> VlmResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connection_timeout))
            .build()?;
        Ok(Self {
            config,
            http,
            progress: None,
        })
    }

    /// Report progress of trait-level completions to `handler`
    pub fn on_progress(mut self, handler: impl Fn(VlmProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(handler));
        self
    }

    pub fn config(&self) -> &VlmConfig {
        &self.config
    }

    /// Run a request with streaming and progress callbacks
    pub async fn complete_with_progress<F>(
        &self,
        request: &InferenceRequest,
        mut on_progress: F,
    ) -> VlmResult<String>
    where
        F: FnMut(VlmProgress) + Send,
    {
        let body = build_request_body(&self.config.model, request, true);
        let mut response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| VlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            on_progress(VlmProgress::Error(format!("HTTP {}", status)));
            return Err(VlmError::Status { status, body });
        }

        on_progress(VlmProgress::Connected);

        let activity_timeout = Duration::from_secs(self.config.activity_timeout);
        let mut stream = SseAccumulator::default();

        loop {
            let chunk = match tokio::time::timeout(activity_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    on_progress(VlmProgress::Error(e.to_string()));
                    return Err(VlmError::Http(e));
                }
                Err(_) => {
                    on_progress(VlmProgress::Error("activity timeout".to_string()));
                    return Err(VlmError::ActivityTimeout(activity_timeout));
                }
            };

            let grew = stream.push(&chunk);
            if grew {
                on_progress(VlmProgress::Receiving(stream.content.clone()));
            }
            if stream.done {
                break;
            }
        }

        let content = match stream.finish() {
            Some(content) => content,
            None => {
                // Server ignored "stream": true and answered with a plain body,
                // or sent nothing usable at all.
                debug!(endpoint = %self.config.endpoint, "no SSE content, falling back to non-streaming");
                self.complete_non_streaming(request).await?
            }
        };

        on_progress(VlmProgress::Complete(content.clone()));
        Ok(content)
    }

    /// Fallback non-streaming request (for APIs that don't support streaming)
    async fn complete_non_streaming(&self, request: &InferenceRequest) -> VlmResult<String> {
        let body = build_request_body(&self.config.model, request, false);
        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| VlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VlmError::Status { status, body });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| VlmError::InvalidResponse(e.to_string()))?;

        message_content(&value)
            .ok_or_else(|| VlmError::InvalidResponse("response has no message content".to_string()))
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let builder = self.http.post(&self.config.endpoint).json(body);
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl InferenceClient for VlmClient {
    async fn complete(&self, request: &InferenceRequest) -> VlmResult<String> {
        self.complete_with_progress(request, |progress| {
            if let Some(handler) = &self.progress {
                handler(progress);
            }
        })
        .await
    }
}

/// Check if a VLM endpoint is reachable (connection-only check).
///
/// This only verifies the server accepts connections - it doesn't wait
/// for a full inference since requests with images can take 30+ seconds.
pub async fn check_health(endpoint: &str, timeout_secs: u64) -> VlmResult<bool> {
    let url = url::Url::parse(endpoint).map_err(|_| VlmError::InvalidEndpoint(endpoint.to_string()))?;
    let origin = url.origin().ascii_serialization();

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs))
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    // Any response (even 4xx/5xx) means the server is reachable
    match client.head(&origin).send().await {
        Ok(_) => Ok(true),
        Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
        Err(e) => Err(VlmError::Http(e)),
    }
}

/// Build the chat completions request body
pub fn build_request_body(model: &str, request: &InferenceRequest, stream: bool) -> Value {
    let mut content: Vec<Value> = request
        .images
        .iter()
        .map(|image| {
            json!({
                "type": "image_url",
                "image_url": { "url": image.data_url() }
            })
        })
        .collect();
    content.push(json!({ "type": "text", "text": request.prompt }));

    json!({
        "model": model,
        "messages": [{ "role": "user", "content": content }],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
        "stream": stream
    })
}

/// Extract the message content of a non-streaming completion, falling back
/// to `reasoning_content` for thinking models.
fn message_content(response: &Value) -> Option<String> {
    let message = &response["choices"][0]["message"];
    message["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .or_else(|| message["reasoning_content"].as_str().filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// Incremental SSE parser. Bytes are buffered until a full line arrives so
/// multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
struct SseAccumulator {
    pending: Vec<u8>,
    raw: Vec<u8>,
    content: String,
    reasoning: String,
    done: bool,
}

impl SseAccumulator {
    /// Feed a chunk; returns true when visible content grew.
    fn push(&mut self, chunk: &[u8]) -> bool {
        self.raw.extend_from_slice(chunk);
        self.pending.extend_from_slice(chunk);

        let before = self.content.len();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.ingest_line(line.trim());
            if self.done {
                break;
            }
        }
        self.content.len() > before
    }

    fn ingest_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return;
        }
        if let Ok(json) = serde_json::from_str::<Value>(data) {
            let delta = &json["choices"][0]["delta"];
            if let Some(content) = delta["content"].as_str() {
                self.content.push_str(content);
            }
            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                self.reasoning.push_str(reasoning);
            }
        }
    }

    /// Final text: streamed content, else reasoning, else a plain JSON body.
    fn finish(mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.ingest_line(String::from_utf8_lossy(&rest).trim());
        }
        if !self.content.is_empty() {
            return Some(self.content);
        }
        if !self.reasoning.is_empty() {
            return Some(self.reasoning);
        }
        serde_json::from_slice::<Value>(&self.raw)
            .ok()
            .and_then(|v| message_content(&v))
    }
}
