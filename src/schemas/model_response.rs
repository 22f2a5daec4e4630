use serde::{Deserialize, Serialize};

use super::{TokenUsage, ToolCall};

/// Provider-agnostic generation result. This is the narrow waist between the
/// three provider adapters and everything that consumes model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub provider: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn text(
        provider: impl Into<String>,
        model: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            provider: provider.into(),
            model: model.into(),
            usage: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }
}
