use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::containers::{ContainerSupervisor, CreateContainerRequest, ExecuteScriptRequest};
use crate::error::Result;

use super::{ToolDeclaration, ToolExecutor};

#[derive(Clone, Copy)]
enum DockerOp {
    Create,
    Destroy,
    ExecuteScript,
    List,
    CleanupIdle,
}

/// One `dockerManager.*` tool bound to the shared supervisor.
pub struct DockerTool {
    supervisor: Arc<ContainerSupervisor>,
    op: DockerOp,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInput {
    group_id: String,
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRef {
    container_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecInput {
    container_id: String,
    script: String,
    /// Milliseconds.
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListInput {
    group_id: Option<String>,
}

#[async_trait]
impl ToolExecutor for DockerTool {
    async fn execute(&self, arguments: Value) -> Result<Value> {
        match self.op {
            DockerOp::Create => {
                let input: CreateInput = serde_json::from_value(arguments)?;
                let record = self
                    .supervisor
                    .create_container(CreateContainerRequest {
                        group_id: input.group_id,
                        image: input.image,
                    })
                    .await?;
                Ok(serde_json::to_value(record)?)
            }
            DockerOp::Destroy => {
                let input: ContainerRef = serde_json::from_value(arguments)?;
                self.supervisor.destroy_container(&input.container_id).await?;
                Ok(json!({"destroyed": input.container_id}))
            }
            DockerOp::ExecuteScript => {
                let input: ExecInput = serde_json::from_value(arguments)?;
                let output = self
                    .supervisor
                    .execute_script(ExecuteScriptRequest {
                        container_id: input.container_id,
                        script: input.script,
                        timeout: input.timeout.map(Duration::from_millis),
                    })
                    .await?;
                Ok(Value::String(output))
            }
            DockerOp::List => {
                let input: ListInput = optional_args(arguments)?;
                let containers = self.supervisor.list_containers(input.group_id.as_deref()).await;
                Ok(serde_json::to_value(containers)?)
            }
            DockerOp::CleanupIdle => {
                let cleaned = self.supervisor.cleanup_idle_containers().await?;
                Ok(json!({"cleaned": cleaned}))
            }
        }
    }
}

fn optional_args<T: Default + serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(arguments)?)
}

/// Declarations and executors for the container tool family.
pub fn container_tools(
    supervisor: Arc<ContainerSupervisor>,
) -> Vec<(ToolDeclaration, Arc<dyn ToolExecutor>)> {
    let tool = |op: DockerOp| -> Arc<dyn ToolExecutor> {
        Arc::new(DockerTool {
            supervisor: supervisor.clone(),
            op,
        })
    };

    vec![
        (
            ToolDeclaration::new(
                "dockerManager.createContainer",
                "Creates and starts an isolated container in the given group.",
                json!({
                    "type": "object",
                    "properties": {
                        "groupId": {"type": "string", "description": "Quota group for the container"},
                        "image": {"type": "string", "description": "Image to run; defaults to the configured image"}
                    },
                    "required": ["groupId"]
                }),
            ),
            tool(DockerOp::Create),
        ),
        (
            ToolDeclaration::new(
                "dockerManager.destroyContainer",
                "Stops and removes a container.",
                json!({
                    "type": "object",
                    "properties": {
                        "containerId": {"type": "string", "description": "Id of the container to destroy"}
                    },
                    "required": ["containerId"]
                }),
            ),
            tool(DockerOp::Destroy),
        ),
        (
            ToolDeclaration::new(
                "dockerManager.executeScript",
                "Runs a shell script inside a container and returns its combined output.",
                json!({
                    "type": "object",
                    "properties": {
                        "containerId": {"type": "string", "description": "Target container id"},
                        "script": {"type": "string", "description": "Shell script to run"},
                        "timeout": {"type": "integer", "description": "Optional timeout in milliseconds"}
                    },
                    "required": ["containerId", "script"]
                }),
            ),
            tool(DockerOp::ExecuteScript),
        ),
        (
            ToolDeclaration::new(
                "dockerManager.listContainers",
                "Lists supervised containers, optionally filtered by group.",
                json!({
                    "type": "object",
                    "properties": {
                        "groupId": {"type": "string", "description": "Only list containers in this group"}
                    }
                }),
            ),
            tool(DockerOp::List),
        ),
        (
            ToolDeclaration::new(
                "dockerManager.cleanupIdleContainers",
                "Destroys containers idle beyond the configured timeout and returns the count.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(DockerOp::CleanupIdle),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use crate::config::DockerConfig;

    use super::*;

    #[tokio::test]
    async fn list_tool_accepts_null_arguments() {
        let supervisor =
            Arc::new(ContainerSupervisor::new(DockerConfig::default()).unwrap());
        let tools = container_tools(supervisor);
        let list = &tools[3];
        assert_eq!(list.0.name, "dockerManager.listContainers");

        let result = list.1.execute(Value::Null).await.unwrap();
        assert_eq!(result, json!([]));
    }
}
