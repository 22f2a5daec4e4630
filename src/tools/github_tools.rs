use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::containers::ContainerSupervisor;
use crate::error::Result;
use crate::github::{GitHubClient, IssuePatch, NewIssue, NewPullRequest, NewRepository};

use super::{ToolDeclaration, ToolExecutor};

#[derive(Clone, Copy)]
enum GitHubOp {
    CreateRepository,
    ListRepositories,
    GetRepository,
    CreatePullRequest,
    GetPullRequest,
    UpdatePullRequest,
    ClosePullRequest,
    CreateIssue,
    GetIssue,
    UpdateIssue,
    CloseIssue,
    ConfigureGitClient,
}

/// One `githubService.*` tool bound to the shared client. The supervisor is
/// carried for the in-container credential installation.
pub struct GitHubTool {
    client: Arc<GitHubClient>,
    supervisor: Arc<ContainerSupervisor>,
    op: GitHubOp,
}

#[derive(Debug, Deserialize)]
struct RepoRef {
    owner: String,
    repo: String,
}

#[derive(Debug, Deserialize)]
struct NumberRef {
    owner: String,
    repo: String,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct CreateRepositoryInput {
    name: String,
    description: Option<String>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct CreatePullRequestInput {
    owner: String,
    repo: String,
    title: String,
    head: String,
    base: String,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateIssueInput {
    owner: String,
    repo: String,
    title: String,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateInput {
    owner: String,
    repo: String,
    number: u64,
    title: Option<String>,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureGitInput {
    container_id: String,
    username: String,
}

impl UpdateInput {
    fn patch(&self) -> IssuePatch {
        IssuePatch {
            title: self.title.clone(),
            body: self.body.clone(),
            state: None,
        }
    }
}

#[async_trait]
impl ToolExecutor for GitHubTool {
    async fn execute(&self, arguments: Value) -> Result<Value> {
        match self.op {
            GitHubOp::CreateRepository => {
                let input: CreateRepositoryInput = serde_json::from_value(arguments)?;
                let repository = self
                    .client
                    .create_repository(NewRepository {
                        name: input.name,
                        description: input.description,
                        private: input.private,
                    })
                    .await?;
                Ok(serde_json::to_value(repository)?)
            }
            GitHubOp::ListRepositories => {
                let repositories = self.client.list_repositories().await?;
                Ok(serde_json::to_value(repositories)?)
            }
            GitHubOp::GetRepository => {
                let input: RepoRef = serde_json::from_value(arguments)?;
                let repository = self.client.get_repository(&input.owner, &input.repo).await?;
                Ok(match repository {
                    Some(repository) => serde_json::to_value(repository)?,
                    None => Value::Null,
                })
            }
            GitHubOp::CreatePullRequest => {
                let input: CreatePullRequestInput = serde_json::from_value(arguments)?;
                let pull_request = self
                    .client
                    .create_pull_request(
                        &input.owner,
                        &input.repo,
                        NewPullRequest {
                            title: input.title,
                            head: input.head,
                            base: input.base,
                            body: input.body,
                        },
                    )
                    .await?;
                Ok(serde_json::to_value(pull_request)?)
            }
            GitHubOp::GetPullRequest => {
                let input: NumberRef = serde_json::from_value(arguments)?;
                let pull_request = self
                    .client
                    .get_pull_request(&input.owner, &input.repo, input.number)
                    .await?;
                Ok(serde_json::to_value(pull_request)?)
            }
            GitHubOp::UpdatePullRequest => {
                let input: UpdateInput = serde_json::from_value(arguments)?;
                let pull_request = self
                    .client
                    .update_pull_request(&input.owner, &input.repo, input.number, input.patch())
                    .await?;
                Ok(serde_json::to_value(pull_request)?)
            }
            GitHubOp::ClosePullRequest => {
                let input: NumberRef = serde_json::from_value(arguments)?;
                let pull_request = self
                    .client
                    .close_pull_request(&input.owner, &input.repo, input.number)
                    .await?;
                Ok(serde_json::to_value(pull_request)?)
            }
            GitHubOp::CreateIssue => {
                let input: CreateIssueInput = serde_json::from_value(arguments)?;
                let issue = self
                    .client
                    .create_issue(
                        &input.owner,
                        &input.repo,
                        NewIssue {
                            title: input.title,
                            body: input.body,
                        },
                    )
                    .await?;
                Ok(serde_json::to_value(issue)?)
            }
            GitHubOp::GetIssue => {
                let input: NumberRef = serde_json::from_value(arguments)?;
                let issue = self
                    .client
                    .get_issue(&input.owner, &input.repo, input.number)
                    .await?;
                Ok(serde_json::to_value(issue)?)
            }
            GitHubOp::UpdateIssue => {
                let input: UpdateInput = serde_json::from_value(arguments)?;
                let issue = self
                    .client
                    .update_issue(&input.owner, &input.repo, input.number, input.patch())
                    .await?;
                Ok(serde_json::to_value(issue)?)
            }
            GitHubOp::CloseIssue => {
                let input: NumberRef = serde_json::from_value(arguments)?;
                let issue = self
                    .client
                    .close_issue(&input.owner, &input.repo, input.number)
                    .await?;
                Ok(serde_json::to_value(issue)?)
            }
            GitHubOp::ConfigureGitClient => {
                let input: ConfigureGitInput = serde_json::from_value(arguments)?;
                let output = self
                    .client
                    .configure_git_client_in_container(
                        &self.supervisor,
                        &input.container_id,
                        &input.username,
                    )
                    .await?;
                Ok(json!({"configured": input.container_id, "output": output}))
            }
        }
    }
}

/// Declarations and executors for the repository-host tool family.
pub fn github_tools(
    client: Arc<GitHubClient>,
    supervisor: Arc<ContainerSupervisor>,
) -> Vec<(ToolDeclaration, Arc<dyn ToolExecutor>)> {
    let tool = |op: GitHubOp| -> Arc<dyn ToolExecutor> {
        Arc::new(GitHubTool {
            client: client.clone(),
            supervisor: supervisor.clone(),
            op,
        })
    };

    let repo_ref = json!({
        "type": "object",
        "properties": {
            "owner": {"type": "string", "description": "Repository owner"},
            "repo": {"type": "string", "description": "Repository name"}
        },
        "required": ["owner", "repo"]
    });
    let number_ref = json!({
        "type": "object",
        "properties": {
            "owner": {"type": "string", "description": "Repository owner"},
            "repo": {"type": "string", "description": "Repository name"},
            "number": {"type": "integer", "description": "Pull request or issue number"}
        },
        "required": ["owner", "repo", "number"]
    });
    let update_ref = json!({
        "type": "object",
        "properties": {
            "owner": {"type": "string", "description": "Repository owner"},
            "repo": {"type": "string", "description": "Repository name"},
            "number": {"type": "integer", "description": "Pull request or issue number"},
            "title": {"type": "string", "description": "New title"},
            "body": {"type": "string", "description": "New body"}
        },
        "required": ["owner", "repo", "number"]
    });

    vec![
        (
            ToolDeclaration::new(
                "githubService.createRepository",
                "Creates a repository for the authenticated user.",
                json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Repository name"},
                        "description": {"type": "string", "description": "Repository description"},
                        "private": {"type": "boolean", "description": "Create as private"}
                    },
                    "required": ["name"]
                }),
            ),
            tool(GitHubOp::CreateRepository),
        ),
        (
            ToolDeclaration::new(
                "githubService.listRepositories",
                "Lists the authenticated user's repositories.",
                json!({"type": "object", "properties": {}}),
            ),
            tool(GitHubOp::ListRepositories),
        ),
        (
            ToolDeclaration::new(
                "githubService.getRepository",
                "Retrieves a repository; null when it does not exist.",
                repo_ref.clone(),
            ),
            tool(GitHubOp::GetRepository),
        ),
        (
            ToolDeclaration::new(
                "githubService.createPullRequest",
                "Opens a pull request.",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": {"type": "string", "description": "Repository owner"},
                        "repo": {"type": "string", "description": "Repository name"},
                        "title": {"type": "string", "description": "Pull request title"},
                        "head": {"type": "string", "description": "Branch with the changes"},
                        "base": {"type": "string", "description": "Branch to merge into"},
                        "body": {"type": "string", "description": "Pull request body"}
                    },
                    "required": ["owner", "repo", "title", "head", "base"]
                }),
            ),
            tool(GitHubOp::CreatePullRequest),
        ),
        (
            ToolDeclaration::new(
                "githubService.getPullRequest",
                "Retrieves a pull request.",
                number_ref.clone(),
            ),
            tool(GitHubOp::GetPullRequest),
        ),
        (
            ToolDeclaration::new(
                "githubService.updatePullRequest",
                "Updates a pull request's title or body.",
                update_ref.clone(),
            ),
            tool(GitHubOp::UpdatePullRequest),
        ),
        (
            ToolDeclaration::new(
                "githubService.closePullRequest",
                "Closes a pull request.",
                number_ref.clone(),
            ),
            tool(GitHubOp::ClosePullRequest),
        ),
        (
            ToolDeclaration::new(
                "githubService.createIssue",
                "Opens an issue.",
                json!({
                    "type": "object",
                    "properties": {
                        "owner": {"type": "string", "description": "Repository owner"},
                        "repo": {"type": "string", "description": "Repository name"},
                        "title": {"type": "string", "description": "Issue title"},
                        "body": {"type": "string", "description": "Issue body"}
                    },
                    "required": ["owner", "repo", "title"]
                }),
            ),
            tool(GitHubOp::CreateIssue),
        ),
        (
            ToolDeclaration::new(
                "githubService.getIssue",
                "Retrieves an issue.",
                number_ref.clone(),
            ),
            tool(GitHubOp::GetIssue),
        ),
        (
            ToolDeclaration::new(
                "githubService.updateIssue",
                "Updates an issue's title or body.",
                update_ref,
            ),
            tool(GitHubOp::UpdateIssue),
        ),
        (
            ToolDeclaration::new(
                "githubService.closeIssue",
                "Closes an issue.",
                number_ref,
            ),
            tool(GitHubOp::CloseIssue),
        ),
        (
            ToolDeclaration::new(
                "githubService.configureGitClientInContainer",
                "Installs git identity and stored credentials inside a container.",
                json!({
                    "type": "object",
                    "properties": {
                        "containerId": {"type": "string", "description": "Target container id"},
                        "username": {"type": "string", "description": "Account username for commits and pushes"}
                    },
                    "required": ["containerId", "username"]
                }),
            ),
            tool(GitHubOp::ConfigureGitClient),
        ),
    ]
}
