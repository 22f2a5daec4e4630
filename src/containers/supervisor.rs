use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DockerConfig;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    Running,
    Exited,
    Dead,
}

/// Registry entry for one supervised container. The registry is
/// authoritative: operations targeting an unregistered id fail fast without
/// querying the runtime.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub group_id: String,
    pub status: ContainerStatus,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub group_id: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecuteScriptRequest {
    pub container_id: String,
    pub script: String,
    pub timeout: Option<Duration>,
}

/// Supervises isolated execution environments: group-quota'd creation,
/// streaming script exec, idle reaping.
pub struct ContainerSupervisor {
    docker: Docker,
    config: DockerConfig,
    registry: Mutex<HashMap<String, ContainerRecord>>,
}

impl ContainerSupervisor {
    pub fn new(config: DockerConfig) -> Result<Self> {
        let docker = match &config.socket_path {
            Some(path) => Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| CoreError::internal(format!("failed to connect to container runtime: {e}")))?;

        Ok(Self::with_docker(docker, config))
    }

    pub fn with_docker(docker: Docker, config: DockerConfig) -> Self {
        Self {
            docker,
            config,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a container in the given group. Fails `ContainerLimitReached`
    /// without touching the runtime when the group is at its quota; the
    /// quota check and the create are serialized under the registry lock.
    pub async fn create_container(&self, request: CreateContainerRequest) -> Result<ContainerRecord> {
        let mut registry = self.registry.lock().await;

        let group_count = registry
            .values()
            .filter(|c| c.group_id == request.group_id)
            .count();
        if group_count >= self.config.container_limit {
            return Err(CoreError::ContainerLimitReached {
                group_id: request.group_id,
                limit: self.config.container_limit,
            });
        }

        let image = request
            .image
            .unwrap_or_else(|| self.config.default_image.clone());
        let name = format!("{}{}", self.config.container_prefix, Uuid::new_v4());
        debug!(%name, %image, group_id = %request.group_id, "creating container");

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(image),
                    tty: Some(true),
                    cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| CoreError::ContainerCreationFailed(e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&created.id, None)
            .await
        {
            // best-effort rollback of the half-created container
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(CoreError::ContainerCreationFailed(e.to_string()));
        }

        let now = Utc::now();
        let record = ContainerRecord {
            id: created.id,
            name,
            group_id: request.group_id,
            status: ContainerStatus::Running,
            created_at: now,
            last_used: now,
        };
        registry.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    pub async fn list_containers(&self, group_id: Option<&str>) -> Vec<ContainerRecord> {
        let registry = self.registry.lock().await;
        registry
            .values()
            .filter(|c| group_id.is_none_or(|g| c.group_id == g))
            .cloned()
            .collect()
    }

    /// Stops (ignoring stop errors) and removes a registered container.
    pub async fn destroy_container(&self, id: &str) -> Result<()> {
        {
            let registry = self.registry.lock().await;
            if !registry.contains_key(id) {
                return Err(CoreError::ContainerNotFound(id.to_string()));
            }
        }

        let _ = self
            .docker
            .stop_container(id, None::<StopContainerOptions>)
            .await;

        let removal = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        match removal {
            Ok(()) => {}
            // already gone from the runtime; dropping the registration is
            // still the right outcome
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(CoreError::ContainerDestructionFailed(e.to_string())),
        }

        let mut registry = self.registry.lock().await;
        registry.remove(id);
        debug!(container_id = %id, "destroyed container");
        Ok(())
    }

    /// Runs a script under `sh -c` inside a registered container, starting
    /// the container first when it is not running, and returns the combined
    /// stdout+stderr. `last_used` advances only on success.
    pub async fn execute_script(&self, request: ExecuteScriptRequest) -> Result<String> {
        {
            let registry = self.registry.lock().await;
            if !registry.contains_key(&request.container_id) {
                return Err(CoreError::ContainerNotFound(request.container_id));
            }
        }

        let inspect = self
            .docker
            .inspect_container(&request.container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| CoreError::ContainerExecutionFailed(e.to_string()))?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            self.docker
                .start_container::<String>(&request.container_id, None)
                .await
                .map_err(|e| CoreError::ContainerExecutionFailed(e.to_string()))?;
        }

        let exec = self
            .docker
            .create_exec(
                &request.container_id,
                CreateExecOptions {
                    cmd: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        request.script.clone(),
                    ]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| CoreError::ContainerExecutionFailed(e.to_string()))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| CoreError::ContainerExecutionFailed(e.to_string()))?;

        let mut buffer = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            let drain = async {
                while let Some(chunk) = output.next().await {
                    let chunk =
                        chunk.map_err(|e| CoreError::ContainerExecutionFailed(e.to_string()))?;
                    match chunk {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message } => {
                            buffer.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
                Ok::<(), CoreError>(())
            };

            match request.timeout {
                Some(timeout) => tokio::time::timeout(timeout, drain).await.map_err(|_| {
                    CoreError::ContainerExecutionFailed(format!(
                        "script timed out after {}ms",
                        timeout.as_millis()
                    ))
                })??,
                None => drain.await?,
            }
        }

        let mut registry = self.registry.lock().await;
        if let Some(record) = registry.get_mut(&request.container_id) {
            record.status = ContainerStatus::Running;
            record.last_used = Utc::now();
        }
        Ok(buffer)
    }

    /// Destroys every registered container idle for longer than the
    /// configured timeout; returns how many were cleaned.
    pub async fn cleanup_idle_containers(&self) -> Result<usize> {
        let idle_for = TimeDelta::from_std(self.config.idle_timeout)
            .map_err(|e| CoreError::internal(format!("idle timeout out of range: {e}")))?;
        let cutoff = Utc::now() - idle_for;

        let stale: Vec<String> = {
            let registry = self.registry.lock().await;
            registry
                .values()
                .filter(|c| c.last_used < cutoff)
                .map(|c| c.id.clone())
                .collect()
        };

        let mut cleaned = 0;
        for id in stale {
            match self.destroy_container(&id).await {
                Ok(()) => cleaned += 1,
                Err(e) => warn!(container_id = %id, %e, "failed to reap idle container"),
            }
        }
        Ok(cleaned)
    }

    /// Returns a manifest of every file under `path` inside the container,
    /// one path per line.
    pub async fn ingest_directory(&self, container_id: &str, path: &str) -> Result<String> {
        let script = format!("find {} -type f", shell_quote(path));
        self.execute_script(ExecuteScriptRequest {
            container_id: container_id.to_string(),
            script,
            timeout: None,
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn register_for_tests(&self, record: ContainerRecord) {
        self.registry.lock().await.insert(record.id.clone(), record);
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
