use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::containers::{ContainerSupervisor, ExecuteScriptRequest};
use crate::error::{CoreError, Result};

use super::{Issue, IssuePatch, NewIssue, NewPullRequest, NewRepository, PullRequest, Repository};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("builder6/", env!("CARGO_PKG_VERSION"));

/// Thin repository-host adapter over the GitHub REST API. Stateless; every
/// operation is one request.
pub struct GitHubClient {
    http: Client,
    base_url: String,
    token: SecretString,
}

impl GitHubClient {
    pub fn new(token: SecretString) -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token.expose_secret()))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", USER_AGENT)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CoreError::RepoHostRequestFailed {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn create_repository(&self, new_repository: NewRepository) -> Result<Repository> {
        debug!(name = %new_repository.name, "creating repository");
        self.send(self.request(Method::POST, "/user/repos").json(&new_repository))
            .await
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.send(self.request(Method::GET, "/user/repos")).await
    }

    /// `None` when the repository does not exist.
    pub async fn get_repository(&self, owner: &str, repo: &str) -> Result<Option<Repository>> {
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CoreError::RepoHostRequestFailed {
                status: status.as_u16(),
                message,
            });
        }
        Ok(Some(response.json::<Repository>().await?))
    }

    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        new_pull_request: NewPullRequest,
    ) -> Result<PullRequest> {
        self.send(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/pulls"))
                .json(&new_pull_request),
        )
        .await
    }

    pub async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest> {
        self.send(self.request(Method::GET, &format!("/repos/{owner}/{repo}/pulls/{number}")))
            .await
    }

    pub async fn update_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        patch: IssuePatch,
    ) -> Result<PullRequest> {
        self.patch(&format!("/repos/{owner}/{repo}/pulls/{number}"), &patch)
            .await
    }

    pub async fn close_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<PullRequest> {
        self.update_pull_request(
            owner,
            repo,
            number,
            IssuePatch {
                state: Some("closed".into()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn create_issue(&self, owner: &str, repo: &str, new_issue: NewIssue) -> Result<Issue> {
        self.send(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/issues"))
                .json(&new_issue),
        )
        .await
    }

    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        self.send(self.request(Method::GET, &format!("/repos/{owner}/{repo}/issues/{number}")))
            .await
    }

    pub async fn update_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        patch: IssuePatch,
    ) -> Result<Issue> {
        self.patch(&format!("/repos/{owner}/{repo}/issues/{number}"), &patch)
            .await
    }

    pub async fn close_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        self.update_issue(
            owner,
            repo,
            number,
            IssuePatch {
                state: Some("closed".into()),
                ..Default::default()
            },
        )
        .await
    }

    async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    /// Installs a global git identity and a store credential-helper entry
    /// inside a supervised container, so repository pushes from the
    /// container authenticate as `username`.
    pub async fn configure_git_client_in_container(
        &self,
        supervisor: &ContainerSupervisor,
        container_id: &str,
        username: &str,
    ) -> Result<String> {
        let script = format!(
            "git config --global user.name '{username}' \
             && git config --global user.email '{username}@users.noreply.github.com' \
             && git config --global credential.helper store \
             && printf 'https://%s:%s@github.com\\n' '{username}' '{token}' > ~/.git-credentials",
            username = username,
            token = self.token.expose_secret(),
        );
        supervisor
            .execute_script(ExecuteScriptRequest {
                container_id: container_id.to_string(),
                script,
                timeout: None,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn client_against(server: &mockito::ServerGuard) -> GitHubClient {
        GitHubClient::new(SecretString::from("ghp_test")).with_base_url(server.url())
    }

    fn repository_body(name: &str) -> String {
        json!({
            "id": 42,
            "name": name,
            "full_name": format!("octocat/{name}"),
            "private": false,
            "html_url": format!("https://github.com/octocat/{name}"),
            "default_branch": "main"
        })
        .to_string()
    }

    #[tokio::test]
    async fn missing_repository_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/octocat/missing")
            .with_status(404)
            .with_body("{\"message\": \"Not Found\"}")
            .create_async()
            .await;

        let repository = client_against(&server)
            .get_repository("octocat", "missing")
            .await
            .unwrap();
        assert!(repository.is_none());
    }

    #[tokio::test]
    async fn create_repository_round_trips() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/user/repos")
            .match_header("authorization", "Bearer ghp_test")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(repository_body("demo"))
            .create_async()
            .await;

        let repository = client_against(&server)
            .create_repository(NewRepository {
                name: "demo".into(),
                description: None,
                private: false,
            })
            .await
            .unwrap();

        assert_eq!(repository.full_name, "octocat/demo");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn close_issue_patches_state() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/repos/octocat/demo/issues/7")
            .match_body(mockito::Matcher::Json(json!({"state": "closed"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "number": 7,
                    "title": "Bug",
                    "state": "closed",
                    "html_url": "https://github.com/octocat/demo/issues/7"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let issue = client_against(&server)
            .close_issue("octocat", "demo", 7)
            .await
            .unwrap();

        assert_eq!(issue.state, "closed");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_surfaces_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user/repos")
            .with_status(401)
            .with_body("{\"message\": \"Bad credentials\"}")
            .create_async()
            .await;

        let err = client_against(&server).list_repositories().await.unwrap_err();

        match err {
            CoreError::RepoHostRequestFailed { status, message } => {
                assert_eq!(status, 401);
                assert!(message.contains("Bad credentials"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
