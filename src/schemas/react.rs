use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ToolCall, ToolResult};

/// One iteration of a task's ReAct loop: what the model said, which tools it
/// called, what came back, and the aggregated observation handed to the next
/// iteration. At least one of `content` / `tool_calls` is populated.
///
/// Entries are persisted on the task as an opaque JSON payload and must
/// round-trip exactly, so every field keeps its serialized form stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReactEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Value>,
}

impl ReactEntry {
    /// Flattens the entry for inclusion in a prompt window.
    pub fn summary_line(&self) -> String {
        match (&self.content, &self.tool_calls) {
            (Some(content), _) if !content.is_empty() => content.clone(),
            (_, Some(calls)) if !calls.is_empty() => {
                let names = calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("(called tools: {names})")
            }
            _ => "(no output)".into(),
        }
    }
}

/// Decodes a task's persisted history payload; absent payload is an empty
/// history.
pub fn decode_history(payload: Option<&str>) -> Result<Vec<ReactEntry>, serde_json::Error> {
    match payload {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(Vec::new()),
    }
}

pub fn encode_history(history: &[ReactEntry]) -> Result<String, serde_json::Error> {
    serde_json::to_string(history)
}
