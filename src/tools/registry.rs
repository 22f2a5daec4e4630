use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::containers::ContainerSupervisor;
use crate::error::{CoreError, Result};
use crate::github::GitHubClient;
use crate::schemas::{ToolCall, ToolResult};

use super::{container_tools, github_tools, ShellCommandTool, ToolDeclaration, WebFetchTool, WebSearchTool};

/// Executes one tool's operation against its native service, coercing the
/// validated argument map into the operation's input shape.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<Value>;
}

struct RegisteredTool {
    declaration: ToolDeclaration,
    executor: Arc<dyn ToolExecutor>,
}

/// Declares the available tools and routes invocations to their executors.
/// Declarations are provider-universal; adapters translate them on the way
/// to each model API.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the service-independent tools: shell, web fetch and
    /// web search.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(ShellCommandTool::declaration(), Arc::new(ShellCommandTool));
        registry.register(
            WebFetchTool::declaration(),
            Arc::new(WebFetchTool::default()),
        );
        registry.register(
            WebSearchTool::declaration(),
            Arc::new(WebSearchTool::default()),
        );
        registry
    }

    pub fn register(&mut self, declaration: ToolDeclaration, executor: Arc<dyn ToolExecutor>) {
        let name = declaration.name.clone();
        match self.index.get(&name) {
            Some(&slot) => {
                self.tools[slot] = RegisteredTool {
                    declaration,
                    executor,
                };
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(RegisteredTool {
                    declaration,
                    executor,
                });
            }
        }
    }

    /// Adds the `dockerManager.*` tool family.
    pub fn with_container_tools(mut self, supervisor: Arc<ContainerSupervisor>) -> Self {
        for (declaration, executor) in container_tools(supervisor) {
            self.register(declaration, executor);
        }
        self
    }

    /// Adds the `githubService.*` tool family. The supervisor backs the
    /// in-container git credential installation.
    pub fn with_github_tools(
        mut self,
        client: Arc<GitHubClient>,
        supervisor: Arc<ContainerSupervisor>,
    ) -> Self {
        for (declaration, executor) in github_tools(client, supervisor) {
            self.register(declaration, executor);
        }
        self
    }

    /// Declarations in registration order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration.clone()).collect()
    }

    /// Looks up, validates and dispatches one invocation.
    pub async fn execute_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let Some(&slot) = self.index.get(name) else {
            return Err(CoreError::ToolUnknown(name.to_string()));
        };
        let tool = &self.tools[slot];

        tool.declaration.validate_arguments(&arguments)?;
        debug!(tool = name, "dispatching tool call");
        tool.executor.execute(arguments).await
    }

    /// Dispatches a batch of calls, converting each failure into a
    /// structured `{"error": ...}` result instead of propagating.
    pub async fn execute_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = match self.execute_tool(&call.name, call.arguments.clone()).await {
                Ok(value) => ToolResult::new(&call.id, value),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    ToolResult::error(&call.id, e.to_string())
                }
            };
            results.push(result);
        }
        results
    }
}
