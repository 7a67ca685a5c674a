//! Maps each typed [`Action`] onto the hosting service.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::actions::{Action, PutFilePayload, RepoName};
use crate::github_client::{FileWrite, GitHubResult, NewIssue, NewPullRequest, RepositoryHost};

/// Prefix for branches created when `PUT_FILE` names none.
pub const AUTO_BRANCH_PREFIX: &str = "agent/auto-";

/// Status and JSON body of a completed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub status: u16,
    pub body: Value,
}

impl ActionOutcome {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutFileResult<'a> {
    branch: &'a str,
    path: &'a str,
    sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit_url: Option<String>,
}

/// Run one action. Makes no retries; the first hosting failure is returned.
pub async fn execute(
    host: &dyn RepositoryHost,
    repo: &RepoName,
    action: &Action,
) -> GitHubResult<ActionOutcome> {
    debug!(repo = %repo, action = %action.kind(), "Dispatching action");

    let outcome = match action {
        Action::GetFile(p) => {
            let file = host.get_file(repo, &p.path, &p.git_ref).await?;
            ActionOutcome::ok(to_json(&file))
        }
        Action::PutFile(p) => put_file(host, repo, p).await?,
        Action::CreateBranch(p) => {
            let sha = create_branch(host, repo, &p.branch, &p.from_ref).await?;
            ActionOutcome::created(json!({ "ok": true, "branch": p.branch, "sha": sha }))
        }
        Action::OpenPr(p) => {
            let pr = host
                .create_pull_request(
                    repo,
                    NewPullRequest {
                        head: &p.head,
                        base: &p.base,
                        title: &p.title,
                        body: p.body.as_deref(),
                    },
                )
                .await?;
            ActionOutcome::created(to_json(&pr))
        }
        Action::ListPrs(p) => ActionOutcome::ok(host.list_pull_requests(repo, p.state).await?),
        Action::MergePr(p) => {
            ActionOutcome::ok(host.merge_pull_request(repo, p.number, p.method).await?)
        }
        Action::CreateIssue(p) => ActionOutcome::created(
            host.create_issue(
                repo,
                NewIssue {
                    title: &p.title,
                    body: p.body.as_deref(),
                    labels: p.labels.as_deref(),
                },
            )
            .await?,
        ),
        Action::CommentIssue(p) => {
            ActionOutcome::ok(host.add_issue_comment(repo, p.number, &p.body).await?)
        }
        Action::AddLabels(p) => {
            ActionOutcome::ok(host.add_issue_labels(repo, p.number, &p.labels).await?)
        }
        Action::SearchCode(p) => ActionOutcome::ok(host.search_code(repo, &p.q).await?),
    };

    Ok(outcome)
}

/// Create `branch` at the head of `from_ref`, returning the new head SHA.
pub async fn create_branch(
    host: &dyn RepositoryHost,
    repo: &RepoName,
    branch: &str,
    from_ref: &str,
) -> GitHubResult<String> {
    let base = host.get_ref(repo, from_ref).await?;
    let created = host.create_ref(repo, branch, &base.sha).await?;
    info!(repo = %repo, branch = %branch, from = %from_ref, "Created branch");
    Ok(created.sha)
}

/// Make sure `branch` exists, creating it from `from_ref` only when the
/// lookup reports it missing. Returns whether it already existed.
pub async fn ensure_branch(
    host: &dyn RepositoryHost,
    repo: &RepoName,
    branch: &str,
    from_ref: &str,
) -> GitHubResult<bool> {
    match host.get_ref(repo, branch).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => {
            create_branch(host, repo, branch, from_ref).await?;
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Branch name for a write that did not name one.
#[must_use]
pub fn auto_branch_name() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{AUTO_BRANCH_PREFIX}{suffix}")
}

async fn put_file(
    host: &dyn RepositoryHost,
    repo: &RepoName,
    p: &PutFilePayload,
) -> GitHubResult<ActionOutcome> {
    let branch = match &p.branch {
        Some(branch) => {
            ensure_branch(host, repo, branch, &p.base_ref).await?;
            branch.clone()
        }
        None => {
            let branch = auto_branch_name();
            create_branch(host, repo, &branch, &p.base_ref).await?;
            branch
        }
    };

    let existing = match host.get_file(repo, &p.path, &branch).await {
        Ok(file) => Some(file.sha),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let commit = host
        .create_or_update_file(
            repo,
            FileWrite {
                path: &p.path,
                content: &p.content,
                message: &p.message,
                branch: &branch,
                sha: existing.as_deref(),
            },
        )
        .await?;

    let body = to_json(&PutFileResult {
        branch: &branch,
        path: &p.path,
        sha: commit.sha,
        commit_url: commit.commit_url,
    });
    Ok(if commit.created {
        ActionOutcome::created(body)
    } else {
        ActionOutcome::ok(body)
    })
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
