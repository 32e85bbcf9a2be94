//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for crawler-synth, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for a local OpenAI-compatible vision endpoint
//! - Conversion into the explicit settings structs each component takes
//!
//! Components never read the environment themselves; the binary builds a
//! [`Config`] once and hands each stage its own settings.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `CRAWLER_SYNTH_VLM_ENDPOINT` | Chat completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `CRAWLER_SYNTH_VLM_MODEL` | Model name | `qwen2.5-vl` |
//! | `CRAWLER_SYNTH_VLM_API_KEY` | Bearer token for the endpoint | unset |
//! | `CRAWLER_SYNTH_VLM_MAX_TOKENS` | Maximum tokens in a response | `2048` |
//! | `CRAWLER_SYNTH_VLM_TEMPERATURE` | Sampling temperature | `0.1` |
//! | `CRAWLER_SYNTH_VLM_TIMEOUT` | Activity timeout while streaming (s) | `120` |
//! | `CRAWLER_SYNTH_VLM_CONNECT_TIMEOUT` | Connection timeout (s) | `10` |
//! | `CRAWLER_SYNTH_SANDBOX_DIR` | Scratch root for sandbox runs | `{tmp}/crawler-synth` |
//! | `CRAWLER_SYNTH_NODE` | Runtime used to execute generated crawlers | `node` |
//! | `CRAWLER_SYNTH_CRAWL_TIMEOUT` | Crawl timeout inside the sandbox (s) | `60` |
//! | `CRAWLER_SYNTH_MAX_ATTEMPTS` | Self-correction attempt budget | `3` |
//! | `CRAWLER_SYNTH_MIN_CONFIDENCE` | Analyses below this are not generated | `0.0` |
//! | `CRAWLER_SYNTH_REVIEW_CONFIDENCE` | Analyses below this are flagged for review | `0.7` |
//! | `CRAWLER_SYNTH_HEADLESS` | Run the capture browser headless | `true` |
//!
//! # Example
//!
//! ```bash
//! export CRAWLER_SYNTH_VLM_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export CRAWLER_SYNTH_VLM_MODEL="llava"
//! export CRAWLER_SYNTH_MIN_CONFIDENCE="0.5"
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::analyzer::AnalyzerSettings;
use crate::browser::BrowserSettings;
use crate::capture::CaptureSettings;
use crate::pipeline::PipelineSettings;
use crate::sandbox::SandboxSettings;
use crate::vlm::VlmConfig;

// ============================================================================
// Default Values
// ============================================================================

/// Default chat completions endpoint
pub const DEFAULT_VLM_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name
pub const DEFAULT_VLM_MODEL: &str = "qwen2.5-vl";

/// Default max tokens for model responses
pub const DEFAULT_VLM_MAX_TOKENS: u32 = 2048;

/// Default sampling temperature. Structural extraction wants determinism.
pub const DEFAULT_VLM_TEMPERATURE: f32 = 0.1;

/// Default connection timeout (seconds)
pub const DEFAULT_VLM_CONNECT_TIMEOUT: u64 = 10;

/// Default activity timeout (seconds)
pub const DEFAULT_VLM_ACTIVITY_TIMEOUT: u64 = 120;

/// Default scratch directory name under the system temp dir
pub const DEFAULT_SANDBOX_DIR_NAME: &str = "crawler-synth";

/// Default runtime for generated crawlers
pub const DEFAULT_NODE_COMMAND: &str = "node";

/// Default crawl timeout inside the sandbox (seconds)
pub const DEFAULT_CRAWL_TIMEOUT: u64 = 60;

/// Default self-correction attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default generation gate (0.0 means every analysis is generated)
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.0;

/// Default review threshold
pub const DEFAULT_REVIEW_CONFIDENCE: f64 = 0.7;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_VLM_ENDPOINT: &str = "CRAWLER_SYNTH_VLM_ENDPOINT";
pub const ENV_VLM_MODEL: &str = "CRAWLER_SYNTH_VLM_MODEL";
pub const ENV_VLM_API_KEY: &str = "CRAWLER_SYNTH_VLM_API_KEY";
pub const ENV_VLM_MAX_TOKENS: &str = "CRAWLER_SYNTH_VLM_MAX_TOKENS";
pub const ENV_VLM_TEMPERATURE: &str = "CRAWLER_SYNTH_VLM_TEMPERATURE";
pub const ENV_VLM_ACTIVITY_TIMEOUT: &str = "CRAWLER_SYNTH_VLM_TIMEOUT";
pub const ENV_VLM_CONNECT_TIMEOUT: &str = "CRAWLER_SYNTH_VLM_CONNECT_TIMEOUT";
pub const ENV_SANDBOX_DIR: &str = "CRAWLER_SYNTH_SANDBOX_DIR";
pub const ENV_NODE_COMMAND: &str = "CRAWLER_SYNTH_NODE";
pub const ENV_CRAWL_TIMEOUT: &str = "CRAWLER_SYNTH_CRAWL_TIMEOUT";
pub const ENV_MAX_ATTEMPTS: &str = "CRAWLER_SYNTH_MAX_ATTEMPTS";
pub const ENV_MIN_CONFIDENCE: &str = "CRAWLER_SYNTH_MIN_CONFIDENCE";
pub const ENV_REVIEW_CONFIDENCE: &str = "CRAWLER_SYNTH_REVIEW_CONFIDENCE";
pub const ENV_HEADLESS: &str = "CRAWLER_SYNTH_HEADLESS";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for crawler-synth
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference endpoint settings
    pub vlm: VlmSettings,
    /// Sandbox settings
    pub sandbox: SandboxEnvSettings,
    /// Pipeline policy
    pub pipeline: PipelineEnvSettings,
}

/// Inference-related settings
#[derive(Debug, Clone)]
pub struct VlmSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
}

/// Sandbox-related settings
#[derive(Debug, Clone)]
pub struct SandboxEnvSettings {
    /// Scratch root for per-run workspaces
    pub base_dir: PathBuf,
    /// Runtime command used to execute generated modules
    pub node_command: String,
    /// Crawl timeout (seconds)
    pub crawl_timeout: u64,
}

/// Pipeline policy settings
#[derive(Debug, Clone)]
pub struct PipelineEnvSettings {
    pub max_attempts: u32,
    pub min_confidence: f64,
    pub review_confidence: f64,
    pub headless: bool,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            vlm: VlmSettings::from_env(),
            sandbox: SandboxEnvSettings::from_env(),
            pipeline: PipelineEnvSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            vlm: VlmSettings::defaults(),
            sandbox: SandboxEnvSettings::defaults(),
            pipeline: PipelineEnvSettings::defaults(),
        }
    }

    pub fn vlm_config(&self) -> VlmConfig {
        VlmConfig {
            endpoint: self.vlm.endpoint.clone(),
            model: self.vlm.model.clone(),
            api_key: self.vlm.api_key.clone(),
            connection_timeout: self.vlm.connect_timeout,
            activity_timeout: self.vlm.activity_timeout,
        }
    }

    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings {
            temperature: self.vlm.temperature,
            max_tokens: self.vlm.max_tokens,
            ..AnalyzerSettings::default()
        }
    }

    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            headless: self.pipeline.headless,
            ..BrowserSettings::default()
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings::default()
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            root_dir: self.sandbox.base_dir.clone(),
            node_command: self.sandbox.node_command.clone(),
            crawl_timeout: Duration::from_secs(self.sandbox.crawl_timeout),
            headless: self.pipeline.headless,
            ..SandboxSettings::default()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            capture: self.capture_settings(),
            analyzer: self.analyzer_settings(),
            max_attempts: self.pipeline.max_attempts,
            min_confidence: self.pipeline.min_confidence,
            review_confidence: self.pipeline.review_confidence,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VlmSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_VLM_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_VLM_ENDPOINT.to_string()),
            model: env::var(ENV_VLM_MODEL)
                .unwrap_or_else(|_| DEFAULT_VLM_MODEL.to_string()),
            api_key: env::var(ENV_VLM_API_KEY).ok().filter(|s| !s.is_empty()),
            max_tokens: parse_env(ENV_VLM_MAX_TOKENS).unwrap_or(DEFAULT_VLM_MAX_TOKENS),
            temperature: parse_env(ENV_VLM_TEMPERATURE).unwrap_or(DEFAULT_VLM_TEMPERATURE),
            connect_timeout: parse_env(ENV_VLM_CONNECT_TIMEOUT)
                .unwrap_or(DEFAULT_VLM_CONNECT_TIMEOUT),
            activity_timeout: parse_env(ENV_VLM_ACTIVITY_TIMEOUT)
                .unwrap_or(DEFAULT_VLM_ACTIVITY_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_VLM_ENDPOINT.to_string(),
            model: DEFAULT_VLM_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_VLM_MAX_TOKENS,
            temperature: DEFAULT_VLM_TEMPERATURE,
            connect_timeout: DEFAULT_VLM_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_VLM_ACTIVITY_TIMEOUT,
        }
    }
}

impl SandboxEnvSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SANDBOX_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_sandbox_dir()),
            node_command: env::var(ENV_NODE_COMMAND)
                .unwrap_or_else(|_| DEFAULT_NODE_COMMAND.to_string()),
            crawl_timeout: parse_env(ENV_CRAWL_TIMEOUT).unwrap_or(DEFAULT_CRAWL_TIMEOUT),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: default_sandbox_dir(),
            node_command: DEFAULT_NODE_COMMAND.to_string(),
            crawl_timeout: DEFAULT_CRAWL_TIMEOUT,
        }
    }
}

impl PipelineEnvSettings {
    pub fn from_env() -> Self {
        Self {
            max_attempts: parse_env(ENV_MAX_ATTEMPTS).unwrap_or(DEFAULT_MAX_ATTEMPTS),
            min_confidence: parse_env(ENV_MIN_CONFIDENCE).unwrap_or(DEFAULT_MIN_CONFIDENCE),
            review_confidence: parse_env(ENV_REVIEW_CONFIDENCE)
                .unwrap_or(DEFAULT_REVIEW_CONFIDENCE),
            headless: env::var(ENV_HEADLESS)
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            review_confidence: DEFAULT_REVIEW_CONFIDENCE,
            headless: true,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `{tmp}/crawler-synth`
pub fn default_sandbox_dir() -> PathBuf {
    env::temp_dir().join(DEFAULT_SANDBOX_DIR_NAME)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a boolean flag value: "1"/"true"/"yes"/"on" and their negatives
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the sandbox root (convenience function)
pub fn sandbox_base_dir() -> PathBuf {
    get().sandbox.base_dir.clone()
}
