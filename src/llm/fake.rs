use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use crate::config::LlmConfig;
use crate::error::{CoreError, Result};
use crate::schemas::{ModelResponse, ToolCall, ToolResult};
use crate::tools::ToolRegistry;

use super::{parse_json_response, ModelRunner};

/// Programmable stand-in for [`super::LlmService`], the sole model-runner
/// substitute used by the test suite.
///
/// Responses are served from, in order of precedence: the substring-pattern
/// map, then the FIFO queue. `generate_with_tools` consults its own FIFO of
/// full responses first so tests can script tool-call turns. Every prompt is
/// recorded and observable through [`FakeModelRunner::calls`].
pub struct FakeModelRunner {
    responses: Mutex<VecDeque<String>>,
    patterns: Mutex<Vec<(String, String)>>,
    tool_responses: Mutex<VecDeque<ModelResponse>>,
    latency: Option<Duration>,
    calls: Mutex<Vec<String>>,
    registry: Arc<ToolRegistry>,
    config: LlmConfig,
}

impl FakeModelRunner {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            patterns: Mutex::new(Vec::new()),
            tool_responses: Mutex::new(VecDeque::new()),
            latency: None,
            calls: Mutex::new(Vec::new()),
            registry,
            config: LlmConfig::default(),
        }
    }

    /// Queues a canned text response.
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses.lock().unwrap().push_back(response.into());
        self
    }

    /// Serves `response` whenever `pattern` occurs in the prompt.
    pub fn with_pattern(self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.patterns
            .lock()
            .unwrap()
            .push((pattern.into(), response.into()));
        self
    }

    /// Queues a full response (typically carrying tool calls) served by
    /// `generate_with_tools`.
    pub fn with_tool_response(self, response: ModelResponse) -> Self {
        self.tool_responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every prompt seen so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn observe(&self, prompt: &str) {
        self.calls.lock().unwrap().push(prompt.to_string());
        if let Some(latency) = self.latency {
            sleep(latency).await;
        }
    }

    fn next_text(&self, prompt: &str) -> Result<String> {
        let patterns = self.patterns.lock().unwrap();
        if let Some((_, response)) = patterns.iter().find(|(pattern, _)| prompt.contains(pattern)) {
            return Ok(response.clone());
        }
        drop(patterns);

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CoreError::internal("fake model runner has no response queued"))
    }
}

#[async_trait]
impl ModelRunner for FakeModelRunner {
    async fn generate_content(&self, prompt: &str) -> Result<String> {
        self.observe(prompt).await;
        self.next_text(prompt)
    }

    async fn generate_response(&self, prompt: &str) -> Result<ModelResponse> {
        self.observe(prompt).await;
        let content = self.next_text(prompt)?;
        Ok(ModelResponse::text("fake", "fake-model", content))
    }

    async fn generate_json(&self, prompt: &str, _schema: Option<&Value>) -> Result<Value> {
        self.observe(prompt).await;
        let raw = self.next_text(prompt)?;
        parse_json_response(&raw)
    }

    async fn generate_with_tools(&self, prompt: &str) -> Result<ModelResponse> {
        self.observe(prompt).await;
        if let Some(response) = self.tool_responses.lock().unwrap().pop_front() {
            return Ok(response);
        }
        let content = self.next_text(prompt)?;
        Ok(ModelResponse::text("fake", "fake-model", content))
    }

    async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        self.registry.execute_tool_calls(calls).await
    }

    fn config(&self) -> &LlmConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn runner() -> FakeModelRunner {
        FakeModelRunner::new(Arc::new(ToolRegistry::new()))
    }

    #[tokio::test]
    async fn fifo_responses_served_in_order() {
        let fake = runner().with_response("first").with_response("second");

        assert_eq!(fake.generate_content("a").await.unwrap(), "first");
        assert_eq!(fake.generate_content("b").await.unwrap(), "second");
        assert!(fake.generate_content("c").await.is_err());
    }

    #[tokio::test]
    async fn pattern_takes_precedence_over_queue() {
        let fake = runner()
            .with_response("queued")
            .with_pattern("deploy", "matched");

        assert_eq!(
            fake.generate_content("please deploy the service").await.unwrap(),
            "matched"
        );
        assert_eq!(fake.generate_content("anything else").await.unwrap(), "queued");
    }

    #[tokio::test]
    async fn tool_response_queue_feeds_generate_with_tools() {
        let response = ModelResponse::text("fake", "fake-model", "").with_tool_calls(vec![
            ToolCall::new("call_1", "run_shell_command", json!({"command": "ls"})),
        ]);
        let fake = runner()
            .with_tool_response(response)
            .with_response("TASK_COMPLETE");

        let first = fake.generate_with_tools("step").await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);

        let second = fake.generate_with_tools("step").await.unwrap();
        assert_eq!(second.content.as_deref(), Some("TASK_COMPLETE"));
    }

    #[tokio::test]
    async fn call_history_is_observable() {
        let fake = runner().with_response("one").with_response("{}");

        fake.generate_content("first prompt").await.unwrap();
        fake.generate_json("second prompt", None).await.unwrap();

        assert_eq!(fake.calls(), vec!["first prompt", "second prompt"]);
    }

    #[tokio::test]
    async fn latency_is_simulated() {
        let fake = runner()
            .with_response("slow")
            .with_latency(Duration::from_millis(20));

        let started = std::time::Instant::now();
        fake.generate_content("x").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
