//! GitHub REST client used to carry out agent actions.
//!
//! The dispatcher talks to the hosting service through [`RepositoryHost`];
//! [`GitHubClient`] is the production implementation.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::actions::{MergeMethod, PrState, RepoName};
use crate::config::{CommitAuthor, GitHubAuth};

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Errors from the hosting service.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// The API answered with a non-success status.
    #[error("GitHub API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    /// The request never produced a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Could not obtain credentials.
    #[error("GitHub authentication failed: {0}")]
    Auth(String),

    /// The API answered with something we could not interpret.
    #[error("Unexpected GitHub response: {0}")]
    InvalidResponse(String),
}

impl GitHubError {
    /// Error carrying an explicit status, for responses we reject ourselves.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            details: None,
        }
    }

    /// Transport status code, when the failure came with one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            Self::Auth(_) | Self::InvalidResponse(_) => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Error body returned by the API, if any.
    #[must_use]
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Api { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

/// Result type for hosting operations
pub type GitHubResult<T> = Result<T, GitHubError>;

/// Decoded file at a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
    pub content: String,
}

/// Result of a create-or-update file call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    pub sha: Option<String>,
    pub commit_url: Option<String>,
    pub created: bool,
}

/// A branch head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub name: String,
    pub sha: String,
}

/// A newly opened pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

/// Parameters for creating or updating a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub message: &'a str,
    pub branch: &'a str,
    /// Current blob SHA when updating an existing file.
    pub sha: Option<&'a str>,
}

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest<'a> {
    pub head: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
}

/// Parameters for opening an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssue<'a> {
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<&'a [String]>,
}

/// Operations the gateway needs from the repository-hosting service.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn get_file(
        &self,
        repo: &RepoName,
        path: &str,
        git_ref: &str,
    ) -> GitHubResult<FileContent>;

    async fn create_or_update_file(
        &self,
        repo: &RepoName,
        write: FileWrite<'_>,
    ) -> GitHubResult<FileCommit>;

    async fn get_ref(&self, repo: &RepoName, branch: &str) -> GitHubResult<BranchRef>;

    async fn create_ref(&self, repo: &RepoName, branch: &str, sha: &str) -> GitHubResult<BranchRef>;

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        pr: NewPullRequest<'_>,
    ) -> GitHubResult<PullRequestRef>;

    async fn list_pull_requests(&self, repo: &RepoName, state: PrState) -> GitHubResult<Value>;

    async fn merge_pull_request(
        &self,
        repo: &RepoName,
        number: u64,
        method: MergeMethod,
    ) -> GitHubResult<Value>;

    async fn create_issue(&self, repo: &RepoName, issue: NewIssue<'_>) -> GitHubResult<Value>;

    async fn add_issue_comment(
        &self,
        repo: &RepoName,
        number: u64,
        body: &str,
    ) -> GitHubResult<Value>;

    async fn add_issue_labels(
        &self,
        repo: &RepoName,
        number: u64,
        labels: &[String],
    ) -> GitHubResult<Value>;

    async fn search_code(&self, repo: &RepoName, query: &str) -> GitHubResult<Value>;
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: Url,
    auth: GitHubAuth,
    author: CommitAuthor,
    installation_token: Arc<RwLock<Option<CachedToken>>>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Create a new GitHub client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created.
    pub fn new(base_url: &str, auth: GitHubAuth, author: CommitAuthor) -> GitHubResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("agent-gateway/1.0"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let base_url = Url::parse(base_url)
            .map_err(|e| GitHubError::InvalidResponse(format!("invalid API URL {base_url}: {e}")))?;

        Ok(Self {
            client,
            base_url,
            auth,
            author,
            installation_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Build an endpoint URL from path segments; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> GitHubResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GitHubError::InvalidResponse("API URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &RepoName, rest: &[&str]) -> GitHubResult<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    /// Bearer token for API calls, minting an installation token in App mode.
    async fn access_token(&self) -> GitHubResult<String> {
        match &self.auth {
            GitHubAuth::Token(token) => Ok(token.clone()),
            GitHubAuth::App {
                app_id,
                private_key_pem,
                installation_id,
            } => {
                if let Some(cached) = self.installation_token.read().await.as_ref() {
                    if cached.expires_at - Utc::now() > Duration::minutes(1) {
                        return Ok(cached.token.clone());
                    }
                }

                let jwt = app_jwt(*app_id, private_key_pem)?;
                let url = self.endpoint(&[
                    "app",
                    "installations",
                    &installation_id.to_string(),
                    "access_tokens",
                ])?;
                let response = self
                    .client
                    .post(url)
                    .header(AUTHORIZATION, format!("Bearer {jwt}"))
                    .send()
                    .await?;
                let minted: InstallationToken = parse_response(response).await?;

                info!(
                    installation_id,
                    expires_at = %minted.expires_at,
                    "Minted GitHub App installation token"
                );
                *self.installation_token.write().await = Some(CachedToken {
                    token: minted.token.clone(),
                    expires_at: minted.expires_at,
                });
                Ok(minted.token)
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> GitHubResult<reqwest::Response> {
        let token = self.access_token().await?;
        debug!(method = %method, path = %url.path(), "GitHub API request");

        let mut request = self
            .client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> GitHubResult<T> {
        let response = self.send(method, url, body).await?;
        parse_response(response).await
    }
}

/// Turn a response into `T`, or into [`GitHubError::Api`] for error statuses.
async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> GitHubResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(status, response).await);
    }
    response
        .json()
        .await
        .map_err(|e| GitHubError::InvalidResponse(e.to_string()))
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> GitHubError {
    let text = response.text().await.unwrap_or_default();
    let details = serde_json::from_str::<Value>(&text).ok();
    let message = details
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map_or_else(
            || {
                status
                    .canonical_reason()
                    .unwrap_or("Unexpected error")
                    .to_string()
            },
            String::from,
        );
    GitHubError::Api {
        status: status.as_u16(),
        message,
        details,
    }
}

/// Sign a short-lived GitHub App JWT.
fn app_jwt(app_id: u64, private_key_pem: &str) -> GitHubResult<String> {
    let now = Utc::now();
    let claims = AppClaims {
        // Backdated to tolerate clock drift, as GitHub recommends.
        iat: (now - Duration::seconds(60)).timestamp(),
        exp: (now + Duration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| GitHubError::Auth(format!("invalid app private key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| GitHubError::Auth(format!("failed to sign app JWT: {e}")))
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_file(
        &self,
        repo: &RepoName,
        path: &str,
        git_ref: &str,
    ) -> GitHubResult<FileContent> {
        let mut url = self.repo_endpoint(repo, &["contents"])?;
        url.path_segments_mut()
            .map_err(|()| GitHubError::InvalidResponse("API URL cannot be a base".to_string()))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        url.query_pairs_mut().append_pair("ref", git_ref);

        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| GitHubError::InvalidResponse(e.to_string()))?;

        // Directories come back as arrays; only files carry `content`.
        let entry: ContentResponse = serde_json::from_value(body)
            .map_err(|_| GitHubError::api(400, "Path is not a file"))?;
        let encoded = match (entry.kind.as_deref(), entry.content) {
            (Some("file") | None, Some(content)) => content,
            _ => return Err(GitHubError::api(400, "Path is not a file")),
        };
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = BASE64
            .decode(compact)
            .map_err(|e| GitHubError::InvalidResponse(format!("invalid base64 content: {e}")))?;

        Ok(FileContent {
            path: entry.path,
            git_ref: git_ref.to_string(),
            sha: entry.sha,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    async fn create_or_update_file(
        &self,
        repo: &RepoName,
        write: FileWrite<'_>,
    ) -> GitHubResult<FileCommit> {
        let mut url = self.repo_endpoint(repo, &["contents"])?;
        url.path_segments_mut()
            .map_err(|()| GitHubError::InvalidResponse("API URL cannot be a base".to_string()))?
            .extend(write.path.split('/').filter(|s| !s.is_empty()));

        let identity = json!({ "name": self.author.name, "email": self.author.email });
        let mut body = json!({
            "message": write.message,
            "content": BASE64.encode(write.content.as_bytes()),
            "branch": write.branch,
            "committer": identity,
            "author": identity,
        });
        if let Some(sha) = write.sha {
            body["sha"] = json!(sha);
        }

        let response = self.send(Method::PUT, url, Some(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| GitHubError::InvalidResponse(e.to_string()))?;

        Ok(FileCommit {
            sha: data
                .pointer("/content/sha")
                .and_then(Value::as_str)
                .map(String::from),
            commit_url: data
                .pointer("/commit/html_url")
                .and_then(Value::as_str)
                .map(String::from),
            created: status == StatusCode::CREATED,
        })
    }

    async fn get_ref(&self, repo: &RepoName, branch: &str) -> GitHubResult<BranchRef> {
        let mut url = self.repo_endpoint(repo, &["git", "ref", "heads"])?;
        url.path_segments_mut()
            .map_err(|()| GitHubError::InvalidResponse("API URL cannot be a base".to_string()))?
            .extend(branch.split('/'));
        let data: RefResponse = self.call(Method::GET, url, None).await?;
        Ok(BranchRef {
            name: branch.to_string(),
            sha: data.object.sha,
        })
    }

    async fn create_ref(
        &self,
        repo: &RepoName,
        branch: &str,
        sha: &str,
    ) -> GitHubResult<BranchRef> {
        let url = self.repo_endpoint(repo, &["git", "refs"])?;
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        let data: RefResponse = self.call(Method::POST, url, Some(&body)).await?;
        Ok(BranchRef {
            name: branch.to_string(),
            sha: data.object.sha,
        })
    }

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        pr: NewPullRequest<'_>,
    ) -> GitHubResult<PullRequestRef> {
        let url = self.repo_endpoint(repo, &["pulls"])?;
        let body =
            serde_json::to_value(&pr).map_err(|e| GitHubError::InvalidResponse(e.to_string()))?;
        let data: PullResponse = self.call(Method::POST, url, Some(&body)).await?;
        Ok(PullRequestRef {
            number: data.number,
            url: data.html_url,
        })
    }

    async fn list_pull_requests(&self, repo: &RepoName, state: PrState) -> GitHubResult<Value> {
        let mut url = self.repo_endpoint(repo, &["pulls"])?;
        url.query_pairs_mut().append_pair("state", state.as_str());
        self.call(Method::GET, url, None).await
    }

    async fn merge_pull_request(
        &self,
        repo: &RepoName,
        number: u64,
        method: MergeMethod,
    ) -> GitHubResult<Value> {
        let url = self.repo_endpoint(repo, &["pulls", &number.to_string(), "merge"])?;
        let body = json!({ "merge_method": method.as_str() });
        self.call(Method::PUT, url, Some(&body)).await
    }

    async fn create_issue(&self, repo: &RepoName, issue: NewIssue<'_>) -> GitHubResult<Value> {
        let url = self.repo_endpoint(repo, &["issues"])?;
        let body = serde_json::to_value(&issue)
            .map_err(|e| GitHubError::InvalidResponse(e.to_string()))?;
        self.call(Method::POST, url, Some(&body)).await
    }

    async fn add_issue_comment(
        &self,
        repo: &RepoName,
        number: u64,
        body: &str,
    ) -> GitHubResult<Value> {
        let url = self.repo_endpoint(repo, &["issues", &number.to_string(), "comments"])?;
        self.call(Method::POST, url, Some(&json!({ "body": body }))).await
    }

    async fn add_issue_labels(
        &self,
        repo: &RepoName,
        number: u64,
        labels: &[String],
    ) -> GitHubResult<Value> {
        let url = self.repo_endpoint(repo, &["issues", &number.to_string(), "labels"])?;
        self.call(Method::POST, url, Some(&json!({ "labels": labels })))
            .await
    }

    async fn search_code(&self, repo: &RepoName, query: &str) -> GitHubResult<Value> {
        let mut url = self.endpoint(&["search", "code"])?;
        url.query_pairs_mut()
            .append_pair("q", &format!("{query} repo:{repo}"));
        self.call(Method::GET, url, None).await
    }
}
