use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::schemas::{ModelResponse, TokenUsage, ToolCall};
use crate::tools::ToolDeclaration;

use super::Provider;

const DEFAULT_MODEL: &str = "gemini-1.5-pro";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    model: String,
    api_key: SecretString,
    base_url: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_key,
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

    async fn request(&self, payload: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );
        let res = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(payload)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = format!("Gemini returned {status}: {body}");
            return Err(match status.as_u16() {
                503 | 529 => CoreError::ModelUpstreamTransient(message),
                _ => CoreError::ModelUpstreamFatal(message),
            });
        }

        Ok(res.json::<GenerateContentResponse>().await?)
    }

    fn build_payload(
        &self,
        prompt: &str,
        tools: &[ToolDeclaration],
        json_mode: bool,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                    function_call: None,
                }],
            }],
            tools: (!tools.is_empty()).then(|| {
                vec![GeminiTools {
                    function_declarations: tools
                        .iter()
                        .map(|t| {
                            serde_json::json!({
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            })
                        })
                        .collect(),
                }]
            }),
            generation_config: json_mode.then(|| GenerationConfig {
                response_mime_type: "application/json".into(),
            }),
        }
    }

    fn into_response(&self, res: GenerateContentResponse) -> ModelResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        let parts = res
            .candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts);
        for part in parts {
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
            // Gemini carries no call id; synthesize one for correlation.
            if let Some(call) = part.function_call {
                let id = format!("call_{}", tool_calls.len() + 1);
                tool_calls.push(ToolCall::new(id, call.name, call.args));
            }
        }

        let usage = res
            .usage_metadata
            .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count));

        ModelResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            provider: "gemini".into(),
            model: self.model.clone(),
            usage,
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, tools: &[ToolDeclaration]) -> Result<ModelResponse> {
        let payload = self.build_payload(prompt, tools, false);
        let res = self.request(&payload).await?;
        Ok(self.into_response(res))
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let payload = self.build_payload(prompt, &[], true);
        let res = self.request(&payload).await?;
        self.into_response(res)
            .content
            .ok_or_else(|| CoreError::internal("Gemini returned no text content"))
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        rename = "functionCall",
        skip_serializing_if = "Option::is_none",
        default
    )]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize)]
struct GeminiTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<Value>,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}
