use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, ResponseFormat,
};
use async_openai::Client as OpenAIClient;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CoreError, Result};
use crate::schemas::{ModelResponse, ToolCall};
use crate::tools::ToolDeclaration;

use super::{is_transient_message, Provider};

const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &SecretString) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        Self {
            client: OpenAIClient::with_config(config),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    async fn chat(
        &self,
        prompt: &str,
        tools: &[ToolDeclaration],
        json_mode: bool,
    ) -> Result<ModelResponse> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(map_openai_error)?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(vec![message.into()]);
        if json_mode {
            request.response_format(ResponseFormat::JsonObject);
        }
        if !tools.is_empty() {
            let tools = tools
                .iter()
                .map(|t| t.try_into_openai_tool())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(map_openai_error)?;
            request.tools(tools);
        }
        let request = request.build().map_err(map_openai_error)?;

        let response: CreateChatCompletionResponse = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let usage = response.usage.map(Into::into);
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::internal("OpenAI returned no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(ToolCall::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ModelResponse {
            content: choice.message.content,
            tool_calls,
            provider: "openai".into(),
            model: self.model.clone(),
            usage,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, tools: &[ToolDeclaration]) -> Result<ModelResponse> {
        self.chat(prompt, tools, false).await
    }

    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.chat(prompt, &[], true)
            .await?
            .content
            .ok_or_else(|| CoreError::internal("OpenAI returned no text content"))
    }
}

fn map_openai_error(error: OpenAIError) -> CoreError {
    let message = error.to_string();
    if is_transient_message(&message) {
        CoreError::ModelUpstreamTransient(message)
    } else {
        CoreError::ModelUpstreamFatal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn live_generate() {
        let key = SecretString::from(std::env::var("OPENAI_API_KEY").unwrap());
        let provider = OpenAiProvider::new(&key).with_model("gpt-4o-mini");

        let response = provider.generate("Say hi in one word.", &[]).await.unwrap();
        assert!(response.content.is_some());
    }
}
