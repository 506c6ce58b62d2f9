pub mod artifact;
pub mod error;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tenon_core::{
    config::GitHubConfig,
    models::{Artifact, WorkflowRun},
    util::split_repo,
};

use crate::error::{ApiError, ApiResult};

const USER_AGENT: &str = concat!("tenon-ci/", env!("CARGO_PKG_VERSION"));
const ACCEPT_JSON: &str = "application/vnd.github+json";

/// Default page size when listing workflow runs after a dispatch.
pub const DEFAULT_RUNS_PER_PAGE: u8 = 5;

/// Thin GitHub REST transport. Holds one pooled HTTP client for the process
/// lifetime; constructed explicitly and owned by the orchestrator.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct ArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> ApiResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| ApiError::Validation("GitHub token contains invalid characters".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, api_base: config.api_base.trim_end_matches('/').to_string() })
    }

    /// Fetch the authenticated user, verifying the configured token works.
    pub async fn verify_token(&self) -> ApiResult<String> {
        let user: Value = self.get_json("/user").await?;
        let login = user.get("login").and_then(Value::as_str).unwrap_or_default().to_string();
        tracing::info!("Logged in as {}", login);
        Ok(login)
    }

    pub async fn generate_repo_from_template(
        &self,
        template_repo: &str,
        owner: &str,
        name: &str,
        private: bool,
    ) -> ApiResult<Value> {
        let (template_owner, template_name) = self.split(template_repo)?;
        let body = json!({ "owner": owner, "name": name, "private": private });
        self.request_json(
            Method::POST,
            &format!("/repos/{template_owner}/{template_name}/generate"),
            Some(&body),
        )
        .await
    }

    pub async fn add_collaborator(
        &self,
        repo: &str,
        username: &str,
        permission: &str,
    ) -> ApiResult<()> {
        if username.is_empty() || !username.chars().all(|c| c.is_alphanumeric() || c == '-') {
            return Err(ApiError::Validation(format!("Invalid GitHub username: {username:?}")));
        }
        let (owner, name) = self.split(repo)?;
        let body = json!({ "permission": permission });
        self.send(
            Method::PUT,
            &format!("/repos/{owner}/{name}/collaborators/{username}"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn trigger_workflow_dispatch(
        &self,
        repo: &str,
        workflow_file: &str,
        git_ref: &str,
        inputs: &Value,
    ) -> ApiResult<()> {
        if git_ref.is_empty() {
            return Err(ApiError::Validation("Invalid branch name: empty".into()));
        }
        let (owner, name) = self.split(repo)?;
        let body = json!({ "ref": git_ref, "inputs": inputs });
        // 204 on success
        self.send(
            Method::POST,
            &format!("/repos/{owner}/{name}/actions/workflows/{workflow_file}/dispatches"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn get_workflow_run(&self, repo: &str, run_id: u64) -> ApiResult<WorkflowRun> {
        let (owner, name) = self.split(repo)?;
        self.get_json(&format!("/repos/{owner}/{name}/actions/runs/{run_id}")).await
    }

    pub async fn list_workflow_runs(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
        per_page: u8,
    ) -> ApiResult<Vec<WorkflowRun>> {
        let (owner, name) = self.split(repo)?;
        let response = self
            .http
            .get(self.url(&format!(
                "/repos/{owner}/{name}/actions/workflows/{workflow_file}/runs"
            )))
            .query(&[("branch", branch.to_string()), ("per_page", per_page.to_string())])
            .send()
            .await?;
        let response: WorkflowRunsResponse = Self::check(response).await?.json().await?;
        Ok(response.workflow_runs)
    }

    pub async fn get_branch(&self, repo: &str, branch: &str) -> ApiResult<Value> {
        if branch.is_empty() {
            return Err(ApiError::Validation("Invalid branch name: empty".into()));
        }
        let (owner, name) = self.split(repo)?;
        self.get_json(&format!("/repos/{owner}/{name}/branches/{branch}")).await
    }

    pub async fn get_repo(&self, repo: &str) -> ApiResult<Value> {
        let (owner, name) = self.split(repo)?;
        self.get_json(&format!("/repos/{owner}/{name}")).await
    }

    pub async fn get_file_contents(
        &self,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> ApiResult<Value> {
        let (owner, name) = self.split(repo)?;
        let mut request =
            self.http.get(self.url(&format!("/repos/{owner}/{name}/contents/{path}")));
        if let Some(git_ref) = git_ref {
            request = request.query(&[("ref", git_ref)]);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// Returns GitHub's compare payload verbatim; callers pass through the
    /// diff summary without reinterpreting it.
    pub async fn get_compare(&self, repo: &str, base: &str, head: &str) -> ApiResult<Value> {
        let (owner, name) = self.split(repo)?;
        self.get_json(&format!("/repos/{owner}/{name}/compare/{base}...{head}")).await
    }

    pub async fn list_artifacts(&self, repo: &str, run_id: u64) -> ApiResult<Vec<Artifact>> {
        let (owner, name) = self.split(repo)?;
        let response: ArtifactsResponse =
            self.get_json(&format!("/repos/{owner}/{name}/actions/runs/{run_id}/artifacts")).await?;
        Ok(response.artifacts)
    }

    /// Download an artifact archive. GitHub responds with a redirect to blob
    /// storage; the client follows it and returns the zip bytes.
    pub async fn download_artifact_zip(&self, repo: &str, artifact_id: u64) -> ApiResult<Vec<u8>> {
        let (owner, name) = self.split(repo)?;
        let response = self
            .http
            .get(self.url(&format!("/repos/{owner}/{name}/actions/artifacts/{artifact_id}/zip")))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    fn split<'a>(&self, repo: &'a str) -> ApiResult<(&'a str, &'a str)> {
        split_repo(repo).map_err(|e| ApiError::Validation(e.to_string()))
    }

    fn url(&self, path: &str) -> String { format!("{}{}", self.api_base, path) }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = Self::check(self.http.get(self.url(path)).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult<T> {
        let response = self.send(method, path, body).await?;
        Ok(response.json().await?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ApiResult<reqwest::Response> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::check(request.send().await?).await
    }

    async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.as_u16() >= 400 {
            let message = Self::error_message(status, response).await;
            return Err(ApiError::Status { code: status.as_u16(), message });
        }
        Ok(response)
    }

    async fn error_message(status: StatusCode, response: reqwest::Response) -> String {
        let body = response.text().await.unwrap_or_default();
        // GitHub error bodies carry a "message" field; fall back to raw text.
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        let mut message: String = message.trim().chars().take(200).collect();
        if message.is_empty() {
            message = status.canonical_reason().unwrap_or("unknown error").to_string();
        }
        message
    }
}

/// The subset of the transport the orchestrator exercises. Kept behind a
/// trait so tests can substitute an in-memory implementation.
#[async_trait]
pub trait ActionsApi: Send + Sync {
    async fn trigger_workflow_dispatch(
        &self,
        repo: &str,
        workflow_file: &str,
        git_ref: &str,
        inputs: &Value,
    ) -> ApiResult<()>;

    async fn list_workflow_runs(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
        per_page: u8,
    ) -> ApiResult<Vec<WorkflowRun>>;

    async fn get_workflow_run(&self, repo: &str, run_id: u64) -> ApiResult<WorkflowRun>;

    async fn list_artifacts(&self, repo: &str, run_id: u64) -> ApiResult<Vec<Artifact>>;

    async fn download_artifact_zip(&self, repo: &str, artifact_id: u64) -> ApiResult<Vec<u8>>;
}

#[async_trait]
impl ActionsApi for GitHubClient {
    async fn trigger_workflow_dispatch(
        &self,
        repo: &str,
        workflow_file: &str,
        git_ref: &str,
        inputs: &Value,
    ) -> ApiResult<()> {
        GitHubClient::trigger_workflow_dispatch(self, repo, workflow_file, git_ref, inputs).await
    }

    async fn list_workflow_runs(
        &self,
        repo: &str,
        workflow_file: &str,
        branch: &str,
        per_page: u8,
    ) -> ApiResult<Vec<WorkflowRun>> {
        GitHubClient::list_workflow_runs(self, repo, workflow_file, branch, per_page).await
    }

    async fn get_workflow_run(&self, repo: &str, run_id: u64) -> ApiResult<WorkflowRun> {
        GitHubClient::get_workflow_run(self, repo, run_id).await
    }

    async fn list_artifacts(&self, repo: &str, run_id: u64) -> ApiResult<Vec<Artifact>> {
        GitHubClient::list_artifacts(self, repo, run_id).await
    }

    async fn download_artifact_zip(&self, repo: &str, artifact_id: u64) -> ApiResult<Vec<u8>> {
        GitHubClient::download_artifact_zip(self, repo, artifact_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GitHubConfig {
        GitHubConfig {
            api_base: "https://api.github.com/".to_string(),
            token: "test_token".to_string(),
            org: None,
            workflow_file: "tenon-ci.yml".to_string(),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = GitHubClient::new(&test_config()).unwrap();
        assert_eq!(client.api_base, "https://api.github.com");
        assert_eq!(client.url("/user"), "https://api.github.com/user");
    }

    #[tokio::test]
    async fn test_invalid_repo_fails_before_network() {
        let client = GitHubClient::new(&test_config()).unwrap();
        let err = client.get_workflow_run("not-a-repo", 1).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
        let err = client.get_repo("owner/").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_invalid_username_fails_before_network() {
        let client = GitHubClient::new(&test_config()).unwrap();
        let err = client.add_collaborator("owner/repo", "bad user!", "push").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_branch_fails_before_network() {
        let client = GitHubClient::new(&test_config()).unwrap();
        let err = client
            .trigger_workflow_dispatch("owner/repo", "ci.yml", "", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
    }
}
