use async_trait::async_trait;

use crate::error::Result;
use crate::schemas::ModelResponse;
use crate::tools::ToolDeclaration;

/// One model provider family behind the universal response shape.
///
/// Implementations map the crate's tool declarations into the provider's
/// native tool descriptions and the provider's native tool-call structures
/// back into `ToolCall {id, name, arguments}`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn model(&self) -> &str;

    /// Single-turn generation; `tools` may be empty.
    async fn generate(&self, prompt: &str, tools: &[ToolDeclaration]) -> Result<ModelResponse>;

    /// Generation constrained to emit JSON, returning the raw text for the
    /// caller to parse.
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}
