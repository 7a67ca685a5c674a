//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gateway::actions::{MergeMethod, PrState, RepoName};
use gateway::github_client::{
    BranchRef, FileCommit, FileContent, FileWrite, GitHubError, GitHubResult, NewIssue,
    NewPullRequest, PullRequestRef, RepositoryHost,
};
use gateway::{AppState, Clock, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const SHARED_SECRET: &str = "test-shared-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const REPO: &str = "acme/app";
pub const BASE_SHA: &str = "base-sha";

// =============================================================================
// Fake repository host
// =============================================================================

/// In-memory stand-in for GitHub. Starts with a `main` branch and no files.
pub struct FakeHost {
    calls: Mutex<Vec<String>>,
    branches: Mutex<HashMap<String, String>>,
    files: Mutex<HashMap<(String, String), (String, String)>>,
    failures: Mutex<HashMap<&'static str, u16>>,
    panic_once: Mutex<Option<&'static str>>,
    delay: Mutex<Option<Duration>>,
    counter: AtomicU64,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            branches: Mutex::new(HashMap::from([("main".to_string(), BASE_SHA.to_string())])),
            files: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            panic_once: Mutex::new(None),
            delay: Mutex::new(None),
            counter: AtomicU64::new(0),
        }
    }
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call to `op` fail with `status`.
    pub fn fail(&self, op: &'static str, status: u16) {
        self.failures.lock().unwrap().insert(op, status);
    }

    /// Make the next call to `op` panic.
    pub fn panic_once(&self, op: &'static str) {
        *self.panic_once.lock().unwrap() = Some(op);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Delay side-effecting calls, to hold a request in flight.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn add_branch(&self, name: &str, sha: &str) {
        self.branches
            .lock()
            .unwrap()
            .insert(name.to_string(), sha.to_string());
    }

    pub fn add_file(&self, branch: &str, path: &str, sha: &str, content: &str) {
        self.files.lock().unwrap().insert(
            (branch.to_string(), path.to_string()),
            (sha.to_string(), content.to_string()),
        );
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.lock().unwrap().contains_key(name)
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(&(branch.to_string(), path.to_string()))
            .map(|(_, content)| content.clone())
    }

    /// Recorded calls as `op:arg` strings, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to `op`.
    pub fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    fn record(&self, op: &'static str, arg: &str) -> GitHubResult<()> {
        self.calls.lock().unwrap().push(format!("{op}:{arg}"));
        let armed = self.panic_once.lock().unwrap().take_if(|target| *target == op);
        if armed.is_some() {
            panic!("{op} panicked");
        }
        match self.failures.lock().unwrap().get(op) {
            Some(&status) => Err(GitHubError::Api {
                status,
                message: format!("{op} failed"),
                details: Some(json!({ "message": format!("{op} failed") })),
            }),
            None => Ok(()),
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl RepositoryHost for FakeHost {
    async fn get_file(
        &self,
        _repo: &RepoName,
        path: &str,
        git_ref: &str,
    ) -> GitHubResult<FileContent> {
        self.record("get_file", &format!("{git_ref}/{path}"))?;
        let files = self.files.lock().unwrap();
        let (sha, content) = files
            .get(&(git_ref.to_string(), path.to_string()))
            .ok_or_else(|| GitHubError::api(404, "Not Found"))?;
        Ok(FileContent {
            path: path.to_string(),
            git_ref: git_ref.to_string(),
            sha: sha.clone(),
            content: content.clone(),
        })
    }

    async fn create_or_update_file(
        &self,
        repo: &RepoName,
        write: FileWrite<'_>,
    ) -> GitHubResult<FileCommit> {
        self.record("create_or_update_file", &format!("{}/{}", write.branch, write.path))?;
        self.pause().await;

        let key = (write.branch.to_string(), write.path.to_string());
        let mut files = self.files.lock().unwrap();
        let existing = files.get(&key).map(|(sha, _)| sha.clone());
        if existing.as_deref() != write.sha {
            return Err(GitHubError::api(409, "sha does not match"));
        }

        let id = self.next_id();
        let sha = format!("blob-{id}");
        files.insert(key, (sha.clone(), write.content.to_string()));
        Ok(FileCommit {
            sha: Some(sha),
            commit_url: Some(format!("https://github.com/{repo}/commit/c{id}")),
            created: existing.is_none(),
        })
    }

    async fn get_ref(&self, _repo: &RepoName, branch: &str) -> GitHubResult<BranchRef> {
        self.record("get_ref", branch)?;
        let branches = self.branches.lock().unwrap();
        let sha = branches
            .get(branch)
            .ok_or_else(|| GitHubError::api(404, "Not Found"))?;
        Ok(BranchRef {
            name: branch.to_string(),
            sha: sha.clone(),
        })
    }

    async fn create_ref(
        &self,
        _repo: &RepoName,
        branch: &str,
        sha: &str,
    ) -> GitHubResult<BranchRef> {
        self.record("create_ref", branch)?;
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(branch) {
            return Err(GitHubError::api(422, "Reference already exists"));
        }
        branches.insert(branch.to_string(), sha.to_string());
        Ok(BranchRef {
            name: branch.to_string(),
            sha: sha.to_string(),
        })
    }

    async fn create_pull_request(
        &self,
        repo: &RepoName,
        pr: NewPullRequest<'_>,
    ) -> GitHubResult<PullRequestRef> {
        self.record("create_pull_request", &format!("{}->{}", pr.head, pr.base))?;
        self.pause().await;
        let number = self.next_id();
        Ok(PullRequestRef {
            number,
            url: format!("https://github.com/{repo}/pull/{number}"),
        })
    }

    async fn list_pull_requests(&self, _repo: &RepoName, state: PrState) -> GitHubResult<Value> {
        self.record("list_pull_requests", state.as_str())?;
        Ok(json!([{ "number": 1, "state": "open", "title": "Example PR" }]))
    }

    async fn merge_pull_request(
        &self,
        _repo: &RepoName,
        number: u64,
        method: MergeMethod,
    ) -> GitHubResult<Value> {
        self.record("merge_pull_request", &format!("{number}/{}", method.as_str()))?;
        Ok(json!({
            "merged": true,
            "sha": "merge-sha",
            "message": "Pull Request successfully merged",
        }))
    }

    async fn create_issue(&self, _repo: &RepoName, issue: NewIssue<'_>) -> GitHubResult<Value> {
        self.record("create_issue", issue.title)?;
        Ok(json!({
            "number": 101,
            "title": issue.title,
            "body": issue.body,
            "labels": issue.labels.unwrap_or_default(),
        }))
    }

    async fn add_issue_comment(
        &self,
        _repo: &RepoName,
        number: u64,
        body: &str,
    ) -> GitHubResult<Value> {
        self.record("add_issue_comment", &number.to_string())?;
        Ok(json!({ "id": 1, "body": body }))
    }

    async fn add_issue_labels(
        &self,
        _repo: &RepoName,
        number: u64,
        labels: &[String],
    ) -> GitHubResult<Value> {
        self.record("add_issue_labels", &number.to_string())?;
        Ok(Value::Array(
            labels.iter().map(|name| json!({ "name": name })).collect(),
        ))
    }

    async fn search_code(&self, repo: &RepoName, query: &str) -> GitHubResult<Value> {
        self.record("search_code", query)?;
        Ok(json!({ "total_count": 0, "items": [], "repo": repo.to_string() }))
    }
}

// =============================================================================
// Gateway fixture
// =============================================================================

/// Config with test secrets, overridden by `extra`.
pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("GITHUB_MODE", "PAT"),
        ("GH_TOKEN", "ghp_test"),
        ("AGENT_SHARED_SECRET", SHARED_SECRET),
        ("GH_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("REPO_ALLOWLIST", REPO),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    Config::from_lookup(|name| vars.get(name).cloned()).expect("valid test config")
}

/// Start the gateway on a random port.
pub async fn spawn_gateway(
    config: Config,
    host: Arc<FakeHost>,
    clock: Option<Arc<dyn Clock>>,
) -> SocketAddr {
    let state = match clock {
        Some(clock) => AppState::with_clock(config, host, clock),
        None => AppState::new(config, host),
    };
    let app = gateway::build_router(Arc::new(state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Execute request body for `action` against the allowlisted repo.
pub fn execute_body(action: &str, payload: Value) -> Value {
    json!({ "agentId": "agent-1", "repo": REPO, "action": action, "payload": payload })
}

/// A signed `POST /agent/execute` ready for extra headers.
pub fn signed_execute(
    client: &reqwest::Client,
    addr: SocketAddr,
    body: &Value,
) -> reqwest::RequestBuilder {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = gateway::security::sign(&raw, SHARED_SECRET);
    client
        .post(format!("http://{addr}/agent/execute"))
        .header("content-type", "application/json")
        .header("x-signature", signature)
        .body(raw)
}
