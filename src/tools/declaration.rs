use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Static description of one callable tool. `parameters` is a
/// JSON-schema-shaped object (`{"type": "object", "properties": ...,
/// "required": [...]}`), identical across providers; each provider adapter
/// maps it into its native tool description.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    pub fn try_into_openai_tool(&self) -> std::result::Result<ChatCompletionTool, OpenAIError> {
        let function = FunctionObjectArgs::default()
            .name(self.name.replace(' ', "_"))
            .description(self.description.clone())
            .parameters(self.parameters.clone())
            .build()?;

        ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(function)
            .build()
    }

    /// Checks an incoming argument map against the declared schema before
    /// dispatch: object shape, required keys, and the type tag of every
    /// declared property that is present.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<()> {
        let invalid = |message: String| CoreError::ToolArgumentInvalid {
            tool: self.name.clone(),
            message,
        };

        let required: Vec<&str> = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let map = match arguments {
            Value::Object(map) => map,
            Value::Null if required.is_empty() => return Ok(()),
            other => {
                return Err(invalid(format!(
                    "arguments must be a JSON object, got {other}"
                )))
            }
        };

        for key in required {
            if !map.contains_key(key) {
                return Err(invalid(format!("missing required argument '{key}'")));
            }
        }

        if let Some(properties) = self.parameters.get("properties").and_then(Value::as_object) {
            for (key, value) in map {
                let Some(expected) = properties
                    .get(key)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !type_matches(expected, value) {
                    return Err(invalid(format!(
                        "argument '{key}' must be of type {expected}"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}
