//! Anthropic Messages API oracle using forced tool use for structured output.

use super::{LayoutOracle, OracleRequest};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

/// Environment variable consulted for the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";
const TOOL_NAME: &str = "record_layout";

/// Configuration for the Anthropic oracle
#[derive(Clone)]
pub struct OracleConfig {
    /// API key
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// API base URL, without a trailing slash
    pub base_url: String,
    /// Output token limit per request
    pub max_tokens: u32,
}

impl std::fmt::Debug for OracleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OracleConfig {
    /// Creates a config with an explicit key and default settings
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 4096,
        }
    }

    /// Creates a config with the key taken from the environment
    pub fn from_env() -> Result<Self> {
        match std::env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key)),
            _ => Err(Error::MissingCredential { env: API_KEY_ENV }),
        }
    }

    /// Sets the model identifier
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the API base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the output token limit
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Oracle backed by the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AnthropicOracle {
    client: Client,
    config: OracleConfig,
}

impl AnthropicOracle {
    /// Creates a new oracle
    pub fn new(config: OracleConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::MissingCredential { env: API_KEY_ENV });
        }
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    /// Returns the configured model identifier
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, request: &OracleRequest<'_>) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "tools": [{
                "name": TOOL_NAME,
                "description": "Record the recovered wire layout of the message",
                "input_schema": request.schema,
            }],
            "tool_choice": { "type": "tool", "name": TOOL_NAME },
            "messages": [{ "role": "user", "content": request.prompt }],
        })
    }
}

/// Pulls the forced tool call's input out of a Messages API response
fn tool_input(entity: &str, response: &Value) -> Result<Value> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::malformed(entity, "response has no content"))?;

    content
        .iter()
        .find(|block| {
            block.get("type").and_then(Value::as_str) == Some("tool_use")
                && block.get("name").and_then(Value::as_str) == Some(TOOL_NAME)
        })
        .and_then(|block| block.get("input"))
        .filter(|input| input.is_object())
        .cloned()
        .ok_or_else(|| {
            let stop = response
                .get("stop_reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Error::malformed(entity, format!("no {TOOL_NAME} output (stop reason: {stop})"))
        })
}

#[async_trait]
impl LayoutOracle for AnthropicOracle {
    async fn complete(&self, request: OracleRequest<'_>) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.base_url);
        debug!("Requesting layout of {} from {}", request.entity, self.config.model);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OracleStatus {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response.json().await?;
        trace!("Oracle response for {}: {}", request.entity, data);
        tool_input(request.entity, &data)
    }
}
