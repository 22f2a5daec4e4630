use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::schemas::{ModelResponse, TokenUsage, ToolCall};
use crate::tools::ToolDeclaration;

use super::Provider;

const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct ClaudeProvider {
    model: String,
    api_key: SecretString,
    anthropic_version: String,
    base_url: String,
    client: Client,
}

impl ClaudeProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key,
            anthropic_version: ANTHROPIC_VERSION.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_anthropic_version<S: Into<String>>(mut self, version: S) -> Self {
        self.anthropic_version = version.into();
        self
    }

    async fn request(&self, payload: &Payload) -> Result<ApiResponse> {
        let res = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", &self.anthropic_version)
            .header("content-type", "application/json; charset=utf-8")
            .json(payload)
            .send()
            .await?;

        match res.status().as_u16() {
            401 => Err(CoreError::ModelUpstreamFatal("Invalid API Key".into())),
            403 => Err(CoreError::ModelUpstreamFatal("Permission Denied".into())),
            404 => Err(CoreError::ModelUpstreamFatal("Not Found".into())),
            429 => Err(CoreError::ModelUpstreamFatal("Rate Limit Exceeded".into())),
            503 => Err(CoreError::ModelUpstreamTransient("Service Unavailable".into())),
            529 => Err(CoreError::ModelUpstreamTransient("overloaded".into())),
            _ => Ok(res.json::<ApiResponse>().await?),
        }
    }

    fn build_payload(
        &self,
        messages: Vec<ClaudeMessage>,
        tools: &[ToolDeclaration],
    ) -> Payload {
        Payload {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            messages,
            tools: (!tools.is_empty()).then(|| {
                tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect()
            }),
        }
    }

    fn into_response(&self, res: ApiResponse) -> ModelResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in res.content {
            match block {
                ContentBlock::Text { text: chunk } => text.push_str(&chunk),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input));
                }
            }
        }

        let usage = res
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens));

        ModelResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            provider: "anthropic".into(),
            model: self.model.clone(),
            usage,
        }
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, tools: &[ToolDeclaration]) -> Result<ModelResponse> {
        let payload = self.build_payload(vec![ClaudeMessage::user(prompt)], tools);
        let res = self.request(&payload).await?;
        Ok(self.into_response(res))
    }

    /// JSON output via prefill: force the assistant turn to begin with `{`
    /// and re-prepend it to the returned text. Assumes a top-level object.
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let payload = self.build_payload(
            vec![ClaudeMessage::user(prompt), ClaudeMessage::assistant("{")],
            &[],
        );
        let res = self.request(&payload).await?;
        let body = self
            .into_response(res)
            .content
            .ok_or_else(|| CoreError::internal("Claude returned no text content"))?;
        Ok(format!("{{{body}"))
    }
}

#[derive(Serialize)]
struct Payload {
    model: String,
    max_tokens: u32,
    messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Serialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

impl ClaudeMessage {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
