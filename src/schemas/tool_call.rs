use async_openai::types::{ChatCompletionMessageToolCall, ChatCompletionToolType, FunctionCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One side-effecting invocation requested by the model. The `id` correlates
/// the call with its result within a single model response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

impl TryFrom<ChatCompletionMessageToolCall> for ToolCall {
    type Error = serde_json::Error;

    fn try_from(value: ChatCompletionMessageToolCall) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            name: value.function.name,
            arguments: serde_json::from_str(&value.function.arguments)?,
        })
    }
}

impl TryFrom<ToolCall> for ChatCompletionMessageToolCall {
    type Error = serde_json::Error;

    fn try_from(value: ToolCall) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id,
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: value.name,
                arguments: serde_json::to_string(&value.arguments)?,
            },
        })
    }
}

/// The outcome of one tool call, keyed back by the triggering call id.
/// A failed dispatch carries `{"error": message}` instead of a payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub result: Value,
}

impl ToolResult {
    pub fn new(tool_call_id: impl Into<String>, result: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: serde_json::json!({ "error": message.as_ref() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_round_trips_through_openai_shape() {
        let call = ToolCall::new("call_1", "run_shell_command", json!({"command": "ls -l"}));

        let openai: ChatCompletionMessageToolCall = call.clone().try_into().unwrap();
        let back: ToolCall = openai.try_into().unwrap();

        assert_eq!(back, call);
    }

    #[test]
    fn error_result_carries_message() {
        let result = ToolResult::error("call_9", "Unknown tool: unknown_tool");

        assert_eq!(
            result.result,
            json!({"error": "Unknown tool: unknown_tool"})
        );
    }
}
