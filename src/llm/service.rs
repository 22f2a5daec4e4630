use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{CoreError, Result};
use crate::schemas::{ModelResponse, ToolCall, ToolResult};
use crate::tools::ToolRegistry;

use super::tokens::validate_prompt_size;
use super::{
    with_retry, ClaudeProvider, GeminiProvider, ModelRunner, OpenAiProvider, Provider, RetryPolicy,
};

/// Production model runner: one provider adapter behind prompt-size
/// validation and retry-with-backoff, plus the tool registry for dispatch.
pub struct LlmService {
    provider: Box<dyn Provider>,
    registry: Arc<ToolRegistry>,
    config: LlmConfig,
    retry: RetryPolicy,
}

impl LlmService {
    pub fn new(provider: Box<dyn Provider>, registry: Arc<ToolRegistry>, config: LlmConfig) -> Self {
        let retry = RetryPolicy::from(&config);
        Self {
            provider,
            registry,
            config,
            retry,
        }
    }

    /// Builds the provider selected by the config discriminator.
    pub fn from_config(config: LlmConfig, registry: Arc<ToolRegistry>) -> Result<Self> {
        let provider = build_provider(&config)?;
        Ok(Self::new(provider, registry, config))
    }

    fn validate(&self, prompt: &str) -> Result<()> {
        validate_prompt_size(self.config.provider, self.provider.model(), prompt)?;
        Ok(())
    }
}

pub fn build_provider(config: &LlmConfig) -> Result<Box<dyn Provider>> {
    let missing_key = |provider: LlmProvider| {
        CoreError::InvalidConfig(format!("API key for provider '{provider}' is not set"))
    };

    Ok(match config.provider {
        LlmProvider::Gemini => {
            let key = config
                .gemini_api_key
                .clone()
                .ok_or_else(|| missing_key(LlmProvider::Gemini))?;
            Box::new(GeminiProvider::new(key))
        }
        LlmProvider::OpenAi => {
            let key = config
                .openai_api_key
                .as_ref()
                .ok_or_else(|| missing_key(LlmProvider::OpenAi))?;
            Box::new(OpenAiProvider::new(key))
        }
        LlmProvider::Anthropic => {
            let key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| missing_key(LlmProvider::Anthropic))?;
            Box::new(ClaudeProvider::new(key))
        }
    })
}

#[async_trait]
impl ModelRunner for LlmService {
    async fn generate_content(&self, prompt: &str) -> Result<String> {
        let response = self.generate_response(prompt).await?;
        response
            .content
            .ok_or_else(|| CoreError::internal("model returned no text content"))
    }

    async fn generate_response(&self, prompt: &str) -> Result<ModelResponse> {
        self.validate(prompt)?;
        with_retry(&self.retry, || self.provider.generate(prompt, &[])).await
    }

    async fn generate_json(&self, prompt: &str, schema: Option<&Value>) -> Result<Value> {
        let prompt = match schema {
            Some(schema) => format!("{prompt}\n\nThe response MUST be JSON matching this schema:\n{schema}"),
            None => prompt.to_string(),
        };
        self.validate(&prompt)?;
        let raw = with_retry(&self.retry, || self.provider.generate_json(&prompt)).await?;
        parse_json_response(&raw)
    }

    async fn generate_with_tools(&self, prompt: &str) -> Result<ModelResponse> {
        self.validate(prompt)?;
        let declarations = self.registry.declarations();
        with_retry(&self.retry, || self.provider.generate(prompt, &declarations)).await
    }

    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        self.registry.execute_tool_calls(calls).await
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }
}

/// Parses model output as JSON, stripping a surrounding markdown code fence
/// when the payload arrives inside one.
pub fn parse_json_response(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence pattern");
    if let Some(captures) = fence.captures(trimmed) {
        return serde_json::from_str::<Value>(&captures[1]).map_err(|e| {
            CoreError::PlanParseFailed(format!("fenced block is not valid JSON: {e}"))
        });
    }

    Err(CoreError::PlanParseFailed(format!(
        "response is not valid JSON: {}",
        truncate(trimmed, 200)
    )))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn raw_json_parses() {
        let value = parse_json_response(r#"[{"description": "Task 1"}]"#).unwrap();
        assert_eq!(value, json!([{"description": "Task 1"}]));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "Here is the plan:\n```json\n[{\"description\": \"Task 1\"}]\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value, json!([{"description": "Task 1"}]));
    }

    #[test]
    fn bare_fence_is_unwrapped() {
        let raw = "```\n{\"ok\": true}\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[test]
    fn garbage_fails_with_plan_parse_error() {
        let err = parse_json_response("no json here").unwrap_err();
        assert!(matches!(err, CoreError::PlanParseFailed(_)));
    }

    #[tokio::test]
    async fn oversized_prompt_fails_before_any_upstream_request() {
        // A gemini-pro prompt of 135000 chars counts 33750 tokens against a
        // 32760 limit; the provider has a bogus key and would fail loudly if
        // the request ever left the process.
        let config = LlmConfig {
            gemini_api_key: Some(secrecy::SecretString::from("unused")),
            ..Default::default()
        };
        let provider =
            GeminiProvider::new(secrecy::SecretString::from("unused")).with_model("gemini-pro");
        let service = LlmService::new(
            Box::new(provider),
            Arc::new(ToolRegistry::new()),
            config,
        );

        let prompt = "a".repeat(135_000);
        let err = service.generate_content(&prompt).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "Prompt too large: 33750 tokens exceeds gemini-pro limit of 32760 tokens"
        );
    }
}
