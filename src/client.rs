use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::AgentError;
use crate::message::{ContentBlock, Turn};

pub const COMPUTER_TOOL_NAME: &str = "computer";
pub const COMPUTER_TOOL_TYPE: &str = "computer_20250124";

/// The computer tool as declared to the model. The action vocabulary is
/// implied by the tool type; the dimensions bound valid coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub display_width_px: u32,
    pub display_height_px: u32,
}

impl ToolDeclaration {
    pub fn computer(kind: impl Into<String>, (width, height): (u32, u32)) -> Self {
        Self {
            kind: kind.into(),
            name: COMPUTER_TOOL_NAME.into(),
            display_width_px: width,
            display_height_px: height,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MessageRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Turn],
    pub tools: &'a [ToolDeclaration],
    pub system: &'a str,
    pub max_tokens: u32,
    /// Sent as the `anthropic-beta` header, not in the body.
    #[serde(skip)]
    pub betas: &'a [String],
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Sends the history and returns exactly one assistant turn.
    async fn create_message(&self, request: &MessageRequest<'_>) -> Result<Turn, AgentError>;
}

#[derive(Clone)]
pub struct ClientConfig {
    pub api_base: String,      // e.g. "https://api.anthropic.com/v1"
    pub api_key: String,       // env ANTHROPIC_API_KEY
    pub api_version: String,
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".into()),
            api_key: env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            api_version: "2023-06-01".into(),
            timeout: None,
        }
    }
}

/// [`ModelClient`] over the Anthropic Messages API. No retries.
#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    cfg: ClientConfig,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl AnthropicClient {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            bail!("ANTHROPIC_API_KEY missing");
        }
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("failed to build HTTP client")?;
        Ok(Self { http, cfg })
    }

    async fn send(&self, request: &MessageRequest<'_>) -> Result<Turn> {
        let url = format!("{}/messages", self.cfg.api_base.trim_end_matches('/'));
        let mut req = self
            .http
            .post(url)
            .header("x-api-key", &self.cfg.api_key)
            .header("anthropic-version", &self.cfg.api_version)
            .json(request);
        if !request.betas.is_empty() {
            req = req.header("anthropic-beta", request.betas.join(","));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("Anthropic error {}: {}", status, text);
        }
        let parsed: MessageResponse =
            serde_json::from_str(&text).context("failed to parse Anthropic response JSON")?;
        Ok(Turn::assistant(parsed.content))
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn create_message(&self, request: &MessageRequest<'_>) -> Result<Turn, AgentError> {
        self.send(request)
            .await
            .map_err(|e| AgentError::Model(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_body_skips_betas() {
        let tools = [ToolDeclaration::computer(COMPUTER_TOOL_TYPE, (1024, 768))];
        let betas = ["computer-use-2025-01-24".to_string()];
        let req = MessageRequest {
            model: "m",
            messages: &[],
            tools: &tools,
            system: "sys",
            max_tokens: 4096,
            betas: &betas,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("betas").is_none());
        assert_eq!(
            v["tools"][0],
            json!({
                "type": "computer_20250124",
                "name": "computer",
                "display_width_px": 1024,
                "display_height_px": 768
            })
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let cfg = ClientConfig { api_key: String::new(), ..ClientConfig::default() };
        assert!(AnthropicClient::new(cfg).is_err());
    }
}
