mod claude;
pub use claude::*;

mod fake;
pub use fake::*;

mod gemini;
pub use gemini::*;

mod openai;
pub use openai::*;

mod provider;
pub use provider::*;

mod retry;
pub use retry::*;

mod service;
pub use service::*;

pub mod tokens;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::schemas::{ModelResponse, ToolCall, ToolResult};

/// Provider-agnostic generation surface consumed by the orchestrator.
///
/// Implemented by [`LlmService`] in production and [`FakeModelRunner`] in the
/// test suite.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Plain text generation.
    async fn generate_content(&self, prompt: &str) -> Result<String>;

    /// Text generation with provider/model/usage metadata.
    async fn generate_response(&self, prompt: &str) -> Result<ModelResponse>;

    /// JSON-mode generation. The response is parsed as JSON; a markdown code
    /// fence around the payload is stripped and the inner text re-parsed.
    async fn generate_json(&self, prompt: &str, schema: Option<&Value>) -> Result<Value>;

    /// Generation with every registered tool declared to the model.
    async fn generate_with_tools(&self, prompt: &str) -> Result<ModelResponse>;

    /// Dispatches tool calls through the registry. Infallible: a failing
    /// dispatch becomes a `{"error": ...}` result for that call.
    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult>;

    fn config(&self) -> &LlmConfig;
}
