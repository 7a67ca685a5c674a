//! Dispatcher tests against the in-memory repository host.

mod common;

use common::{FakeHost, BASE_SHA, REPO};
use gateway::actions::{Action, ActionKind, RepoName};
use gateway::dispatch::{self, AUTO_BRANCH_PREFIX};
use serde_json::{json, Value};

fn repo() -> RepoName {
    RepoName::parse(REPO).unwrap()
}

fn action(kind: ActionKind, payload: Value) -> Action {
    Action::from_parts(kind, payload).unwrap()
}

#[tokio::test]
async fn test_put_file_without_branch_creates_auto_branch() {
    let host = FakeHost::new();
    let put = action(ActionKind::PutFile, json!({ "path": "docs/a.md", "content": "hi" }));

    let outcome = dispatch::execute(host.as_ref(), &repo(), &put).await.unwrap();

    assert_eq!(outcome.status, 201);
    let branch = outcome.body["branch"].as_str().unwrap().to_string();
    assert!(branch.starts_with(AUTO_BRANCH_PREFIX), "{branch}");
    assert_eq!(outcome.body["path"], "docs/a.md");
    assert!(outcome.body["commitUrl"].as_str().unwrap().contains("/commit/"));
    assert!(host.has_branch(&branch));
    assert_eq!(host.file(&branch, "docs/a.md").as_deref(), Some("hi"));

    // The new branch is cut from the default base ref.
    assert_eq!(host.calls()[0], "get_ref:main");
    assert_eq!(host.count("create_ref"), 1);
}

#[tokio::test]
async fn test_put_file_on_existing_branch_updates_file() {
    let host = FakeHost::new();
    host.add_branch("work", "work-sha");
    host.add_file("work", "a.txt", "old-sha", "old");
    let put = action(
        ActionKind::PutFile,
        json!({ "path": "a.txt", "content": "new", "branch": "work", "message": "edit" }),
    );

    let outcome = dispatch::execute(host.as_ref(), &repo(), &put).await.unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.body["branch"], "work");
    assert_eq!(host.file("work", "a.txt").as_deref(), Some("new"));
    assert_eq!(host.count("create_ref"), 0);
}

#[tokio::test]
async fn test_put_file_creates_missing_branch_from_base_ref() {
    let host = FakeHost::new();
    host.add_branch("develop", "dev-sha");
    let put = action(
        ActionKind::PutFile,
        json!({ "path": "a.txt", "content": "x", "branch": "feature", "baseRef": "develop" }),
    );

    let outcome = dispatch::execute(host.as_ref(), &repo(), &put).await.unwrap();

    assert_eq!(outcome.status, 201);
    assert_eq!(
        host.calls()[..3],
        ["get_ref:feature", "get_ref:develop", "create_ref:feature"]
    );
}

#[tokio::test]
async fn test_put_file_branch_lookup_errors_other_than_404_propagate() {
    let host = FakeHost::new();
    host.fail("get_ref", 403);
    let put = action(
        ActionKind::PutFile,
        json!({ "path": "a.txt", "content": "x", "branch": "feature" }),
    );

    let err = dispatch::execute(host.as_ref(), &repo(), &put).await.unwrap_err();

    assert_eq!(err.status(), Some(403));
    assert_eq!(host.count("create_ref"), 0);
    assert_eq!(host.count("create_or_update_file"), 0);
}

#[tokio::test]
async fn test_put_file_sha_lookup_errors_propagate() {
    let host = FakeHost::new();
    host.add_branch("work", "work-sha");
    host.fail("get_file", 500);
    let put = action(
        ActionKind::PutFile,
        json!({ "path": "a.txt", "content": "x", "branch": "work" }),
    );

    let err = dispatch::execute(host.as_ref(), &repo(), &put).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(host.count("create_or_update_file"), 0);
}

#[tokio::test]
async fn test_create_branch_existing_is_remote_error() {
    let host = FakeHost::new();
    host.add_branch("x", "x-sha");
    let create = action(ActionKind::CreateBranch, json!({ "branch": "x" }));

    let err = dispatch::execute(host.as_ref(), &repo(), &create).await.unwrap_err();

    assert_eq!(err.status(), Some(422));
}

#[tokio::test]
async fn test_get_file_response_shape() {
    let host = FakeHost::new();
    host.add_file("main", "README.md", "readme-sha", "# Title");
    let get = action(ActionKind::GetFile, json!({ "path": "README.md" }));

    let outcome = dispatch::execute(host.as_ref(), &repo(), &get).await.unwrap();

    assert_eq!(outcome.status, 200);
    assert_eq!(
        outcome.body,
        json!({ "path": "README.md", "ref": "main", "sha": "readme-sha", "content": "# Title" })
    );
}

#[tokio::test]
async fn test_statuses_and_defaults_per_action() {
    let host = FakeHost::new();
    let cases = [
        (ActionKind::OpenPr, json!({ "head": "x", "title": "t" }), 201),
        (ActionKind::ListPrs, json!({}), 200),
        (ActionKind::MergePr, json!({ "number": 3 }), 200),
        (ActionKind::CreateIssue, json!({ "title": "bug", "labels": ["p1"] }), 201),
        (ActionKind::CommentIssue, json!({ "number": 3, "body": "hi" }), 200),
        (ActionKind::AddLabels, json!({ "number": 3, "labels": ["a", "b"] }), 200),
        (ActionKind::SearchCode, json!({ "q": "fn main" }), 200),
    ];

    for (kind, payload, status) in cases {
        let outcome = dispatch::execute(host.as_ref(), &repo(), &action(kind, payload))
            .await
            .unwrap();
        assert_eq!(outcome.status, status, "{kind}");
    }

    let calls = host.calls();
    assert!(calls.contains(&"create_pull_request:x->main".to_string()));
    assert!(calls.contains(&"list_pull_requests:open".to_string()));
    assert!(calls.contains(&"merge_pull_request:3/squash".to_string()));
}

#[tokio::test]
async fn test_open_pr_body() {
    let host = FakeHost::new();
    let open = action(ActionKind::OpenPr, json!({ "head": "x", "base": "develop", "title": "t" }));

    let outcome = dispatch::execute(host.as_ref(), &repo(), &open).await.unwrap();

    assert_eq!(
        outcome.body,
        json!({ "number": 1, "url": "https://github.com/acme/app/pull/1" })
    );
    assert_eq!(host.calls(), vec!["create_pull_request:x->develop"]);
}

#[tokio::test]
async fn test_ensure_branch_reports_existence() {
    let host = FakeHost::new();

    assert!(dispatch::ensure_branch(host.as_ref(), &repo(), "main", "main").await.unwrap());
    assert!(!dispatch::ensure_branch(host.as_ref(), &repo(), "new", "main").await.unwrap());
    assert!(host.has_branch("new"));

    let sha = dispatch::create_branch(host.as_ref(), &repo(), "other", "main")
        .await
        .unwrap();
    assert_eq!(sha, BASE_SHA);
}
