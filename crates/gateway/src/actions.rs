//! Agent action requests and their payload contracts.
//!
//! Parsing happens in two steps: the envelope (`agentId`, `repo`, `action`,
//! raw `payload`) and then the payload for the declared action. An unknown
//! action and a payload that does not fit the declared action are reported
//! against different fields.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static REPO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/]+/[^/]+$").expect("repo pattern is valid"));

/// Default commit message for `PUT_FILE`.
pub const DEFAULT_COMMIT_MESSAGE: &str = "chore: update via agent gateway";

/// Default ref for reads and new branches.
pub const DEFAULT_REF: &str = "main";

/// Validation failure with per-field messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ActionError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: "Invalid payload".to_string(),
            field_errors: BTreeMap::from([(field.to_string(), vec![message])]),
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Structured details for the error response body.
    #[must_use]
    pub fn details(&self) -> Value {
        json!({ "fieldErrors": self.field_errors })
    }
}

/// Action kinds accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    GetFile,
    PutFile,
    CreateBranch,
    OpenPr,
    ListPrs,
    MergePr,
    CreateIssue,
    CommentIssue,
    AddLabels,
    SearchCode,
}

impl ActionKind {
    pub const ALL: [Self; 10] = [
        Self::GetFile,
        Self::PutFile,
        Self::CreateBranch,
        Self::OpenPr,
        Self::ListPrs,
        Self::MergePr,
        Self::CreateIssue,
        Self::CommentIssue,
        Self::AddLabels,
        Self::SearchCode,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetFile => "GET_FILE",
            Self::PutFile => "PUT_FILE",
            Self::CreateBranch => "CREATE_BRANCH",
            Self::OpenPr => "OPEN_PR",
            Self::ListPrs => "LIST_PRS",
            Self::MergePr => "MERGE_PR",
            Self::CreateIssue => "CREATE_ISSUE",
            Self::CommentIssue => "COMMENT_ISSUE",
            Self::AddLabels => "ADD_LABELS",
            Self::SearchCode => "SEARCH_CODE",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown action '{s}'"))
    }
}

/// Repository identifier in `owner/name` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName {
    pub owner: String,
    pub name: String,
}

impl RepoName {
    /// Parse `owner/name`. Exactly one slash, both sides non-empty.
    pub fn parse(full: &str) -> Result<Self, ActionError> {
        if !REPO_PATTERN.is_match(full) {
            return Err(ActionError::field("repo", "Expected 'owner/name'"));
        }
        let (owner, name) = full
            .split_once('/')
            .ok_or_else(|| ActionError::field("repo", "Expected 'owner/name'"))?;
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn default_ref() -> String {
    DEFAULT_REF.to_string()
}

fn default_commit_message() -> String {
    DEFAULT_COMMIT_MESSAGE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetFilePayload {
    pub path: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PutFilePayload {
    pub path: String,
    /// UTF-8 file content.
    pub content: String,
    #[serde(default = "default_commit_message")]
    pub message: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_ref")]
    pub base_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateBranchPayload {
    pub branch: String,
    #[serde(default = "default_ref")]
    pub from_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenPrPayload {
    pub head: String,
    #[serde(default = "default_ref")]
    pub base: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    #[default]
    Open,
    Closed,
    All,
}

impl PrState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListPrsPayload {
    #[serde(default)]
    pub state: PrState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergePrPayload {
    pub number: u64,
    #[serde(default)]
    pub method: MergeMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateIssuePayload {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommentIssuePayload {
    pub number: u64,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddLabelsPayload {
    pub number: u64,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchCodePayload {
    pub q: String,
}

/// A fully typed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    GetFile(GetFilePayload),
    PutFile(PutFilePayload),
    CreateBranch(CreateBranchPayload),
    OpenPr(OpenPrPayload),
    ListPrs(ListPrsPayload),
    MergePr(MergePrPayload),
    CreateIssue(CreateIssuePayload),
    CommentIssue(CommentIssuePayload),
    AddLabels(AddLabelsPayload),
    SearchCode(SearchCodePayload),
}

impl Action {
    /// Build the action for `kind` from its raw payload.
    pub fn from_parts(kind: ActionKind, payload: Value) -> Result<Self, ActionError> {
        let action = match kind {
            ActionKind::GetFile => Self::GetFile(payload_for(kind, payload)?),
            ActionKind::PutFile => Self::PutFile(payload_for(kind, payload)?),
            ActionKind::CreateBranch => Self::CreateBranch(payload_for(kind, payload)?),
            ActionKind::OpenPr => Self::OpenPr(payload_for(kind, payload)?),
            ActionKind::ListPrs => Self::ListPrs(payload_for(kind, payload)?),
            ActionKind::MergePr => Self::MergePr(payload_for(kind, payload)?),
            ActionKind::CreateIssue => Self::CreateIssue(payload_for(kind, payload)?),
            ActionKind::CommentIssue => Self::CommentIssue(payload_for(kind, payload)?),
            ActionKind::AddLabels => {
                let payload: AddLabelsPayload = payload_for(kind, payload)?;
                if payload.labels.is_empty() {
                    return Err(
                        ActionError::field("payload.labels", "At least one label is required")
                            .with_message(format!("Invalid payload for action {kind}")),
                    );
                }
                Self::AddLabels(payload)
            }
            ActionKind::SearchCode => {
                let payload: SearchCodePayload = payload_for(kind, payload)?;
                if payload.q.chars().count() < 3 {
                    return Err(
                        ActionError::field("payload.q", "Query must be at least 3 characters")
                            .with_message(format!("Invalid payload for action {kind}")),
                    );
                }
                Self::SearchCode(payload)
            }
        };
        Ok(action)
    }

    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::GetFile(_) => ActionKind::GetFile,
            Self::PutFile(_) => ActionKind::PutFile,
            Self::CreateBranch(_) => ActionKind::CreateBranch,
            Self::OpenPr(_) => ActionKind::OpenPr,
            Self::ListPrs(_) => ActionKind::ListPrs,
            Self::MergePr(_) => ActionKind::MergePr,
            Self::CreateIssue(_) => ActionKind::CreateIssue,
            Self::CommentIssue(_) => ActionKind::CommentIssue,
            Self::AddLabels(_) => ActionKind::AddLabels,
            Self::SearchCode(_) => ActionKind::SearchCode,
        }
    }
}

fn payload_for<T: DeserializeOwned>(kind: ActionKind, payload: Value) -> Result<T, ActionError> {
    serde_json::from_value(payload).map_err(|e| {
        ActionError::field("payload", e.to_string())
            .with_message(format!("Invalid payload for action {kind}"))
    })
}

/// Raw request envelope as sent by the agent.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    agent_id: Option<Value>,
    repo: Option<Value>,
    action: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

/// A validated gateway request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub agent_id: String,
    pub repo: RepoName,
    pub action: Action,
}

impl ActionRequest {
    /// Validate a parsed JSON body.
    ///
    /// All envelope problems are collected before reporting; the payload is
    /// only checked once the envelope is sound.
    pub fn from_json(body: Value) -> Result<Self, ActionError> {
        let Value::Object(_) = body else {
            return Err(ActionError::field("body", "Expected a JSON object"));
        };
        let envelope: Envelope = serde_json::from_value(body)
            .map_err(|e| ActionError::field("body", e.to_string()))?;

        let mut field_errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let agent_id = match envelope.agent_id {
            Some(Value::String(id)) if !id.is_empty() => Some(id),
            Some(Value::String(_)) => {
                push(&mut field_errors, "agentId", "Must not be empty");
                None
            }
            Some(_) => {
                push(&mut field_errors, "agentId", "Expected string");
                None
            }
            None => {
                push(&mut field_errors, "agentId", "Required");
                None
            }
        };

        let repo = match envelope.repo {
            Some(Value::String(repo)) => match RepoName::parse(&repo) {
                Ok(repo) => Some(repo),
                Err(e) => {
                    field_errors.extend(e.field_errors);
                    None
                }
            },
            Some(_) => {
                push(&mut field_errors, "repo", "Expected string");
                None
            }
            None => {
                push(&mut field_errors, "repo", "Required");
                None
            }
        };

        let kind = match envelope.action {
            Some(Value::String(action)) => match action.parse::<ActionKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    push(&mut field_errors, "action", &e);
                    None
                }
            },
            Some(_) => {
                push(&mut field_errors, "action", "Expected string");
                None
            }
            None => {
                push(&mut field_errors, "action", "Required");
                None
            }
        };

        let payload = match envelope.payload {
            Some(payload @ Value::Object(_)) => Some(payload),
            Some(_) => {
                push(&mut field_errors, "payload", "Expected object");
                None
            }
            None => {
                push(&mut field_errors, "payload", "Required");
                None
            }
        };

        match (agent_id, repo, kind, payload) {
            (Some(agent_id), Some(repo), Some(kind), Some(payload)) if field_errors.is_empty() => {
                Ok(Self {
                    agent_id,
                    repo,
                    action: Action::from_parts(kind, payload)?,
                })
            }
            _ => Err(ActionError {
                message: "Invalid payload".to_string(),
                field_errors,
            }),
        }
    }
}

fn push(errors: &mut BTreeMap<String, Vec<String>>, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

/// JSON Schema fragment for each payload, used by the OpenAPI document.
#[must_use]
pub fn payload_schema(kind: ActionKind) -> Value {
    let string = json!({ "type": "string" });
    let integer = json!({ "type": "integer", "minimum": 0 });
    let labels = json!({ "type": "array", "items": { "type": "string" } });
    let (required, properties): (Vec<&str>, Map<String, Value>) = match kind {
        ActionKind::GetFile => (
            vec!["path"],
            props([("path", string.clone()), ("ref", defaulted(DEFAULT_REF))]),
        ),
        ActionKind::PutFile => (
            vec!["path", "content"],
            props([
                ("path", string.clone()),
                ("content", string.clone()),
                ("message", defaulted(DEFAULT_COMMIT_MESSAGE)),
                ("branch", string.clone()),
                ("baseRef", defaulted(DEFAULT_REF)),
            ]),
        ),
        ActionKind::CreateBranch => (
            vec!["branch"],
            props([("branch", string.clone()), ("fromRef", defaulted(DEFAULT_REF))]),
        ),
        ActionKind::OpenPr => (
            vec!["head", "title"],
            props([
                ("head", string.clone()),
                ("base", defaulted(DEFAULT_REF)),
                ("title", string.clone()),
                ("body", string.clone()),
            ]),
        ),
        ActionKind::ListPrs => (
            vec![],
            props([("state", string_enum(&["open", "closed", "all"], "open"))]),
        ),
        ActionKind::MergePr => (
            vec!["number"],
            props([
                ("number", integer.clone()),
                ("method", string_enum(&["merge", "squash", "rebase"], "squash")),
            ]),
        ),
        ActionKind::CreateIssue => (
            vec!["title"],
            props([
                ("title", string.clone()),
                ("body", string.clone()),
                ("labels", labels),
            ]),
        ),
        ActionKind::CommentIssue => (
            vec!["number", "body"],
            props([("number", integer.clone()), ("body", string.clone())]),
        ),
        ActionKind::AddLabels => (
            vec!["number", "labels"],
            props([
                ("number", integer),
                (
                    "labels",
                    json!({ "type": "array", "items": { "type": "string" }, "minItems": 1 }),
                ),
            ]),
        ),
        ActionKind::SearchCode => (
            vec!["q"],
            props([("q", json!({ "type": "string", "minLength": 3 }))]),
        ),
    };
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": required,
        "properties": properties,
    })
}

fn defaulted(default: &str) -> Value {
    json!({ "type": "string", "default": default })
}

fn string_enum(values: &[&str], default: &str) -> Value {
    json!({ "type": "string", "enum": values, "default": default })
}

fn props<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(name, schema)| (name.to_string(), schema))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(action: &str, payload: Value) -> Value {
        json!({ "agentId": "a", "repo": "foo/bar", "action": action, "payload": payload })
    }

    #[test]
    fn test_parses_each_action() {
        let cases = [
            ("GET_FILE", json!({ "path": "README.md" })),
            ("PUT_FILE", json!({ "path": "a.txt", "content": "hi" })),
            ("CREATE_BRANCH", json!({ "branch": "x" })),
            ("OPEN_PR", json!({ "head": "x", "title": "t" })),
            ("LIST_PRS", json!({})),
            ("MERGE_PR", json!({ "number": 3 })),
            ("CREATE_ISSUE", json!({ "title": "bug" })),
            ("COMMENT_ISSUE", json!({ "number": 3, "body": "hi" })),
            ("ADD_LABELS", json!({ "number": 3, "labels": ["bug"] })),
            ("SEARCH_CODE", json!({ "q": "fn main" })),
        ];
        for (action, payload) in cases {
            let parsed = ActionRequest::from_json(request(action, payload)).unwrap();
            assert_eq!(parsed.action.kind().as_str(), action);
            assert_eq!(parsed.agent_id, "a");
            assert_eq!(parsed.repo.to_string(), "foo/bar");
        }
    }

    #[test]
    fn test_defaults_are_applied() {
        let parsed = ActionRequest::from_json(request(
            "PUT_FILE",
            json!({ "path": "a.txt", "content": "hi" }),
        ))
        .unwrap();
        let Action::PutFile(payload) = parsed.action else {
            panic!("expected PUT_FILE");
        };
        assert_eq!(payload.message, DEFAULT_COMMIT_MESSAGE);
        assert_eq!(payload.base_ref, "main");
        assert_eq!(payload.branch, None);

        let merge = Action::from_parts(ActionKind::MergePr, json!({ "number": 1 })).unwrap();
        let Action::MergePr(merge) = merge else {
            panic!("expected MERGE_PR");
        };
        assert_eq!(merge.method, MergeMethod::Squash);

        let list = Action::from_parts(ActionKind::ListPrs, json!({})).unwrap();
        let Action::ListPrs(list) = list else {
            panic!("expected LIST_PRS");
        };
        assert_eq!(list.state, PrState::Open);

        let get = Action::from_parts(ActionKind::GetFile, json!({ "path": "p" })).unwrap();
        let Action::GetFile(get) = get else {
            panic!("expected GET_FILE");
        };
        assert_eq!(get.git_ref, "main");
    }

    #[test]
    fn test_put_file_with_open_pr_payload_is_rejected() {
        let err = ActionRequest::from_json(request(
            "PUT_FILE",
            json!({ "head": "feature", "title": "Add thing" }),
        ))
        .unwrap_err();

        assert_eq!(err.message, "Invalid payload for action PUT_FILE");
        assert!(err.field_errors.contains_key("payload"));
        assert!(!err.field_errors.contains_key("action"));
    }

    #[test]
    fn test_payload_for_other_action_with_superset_fields_is_rejected() {
        // Has every CREATE_ISSUE field, but `head` belongs to OPEN_PR.
        let err = ActionRequest::from_json(request(
            "CREATE_ISSUE",
            json!({ "head": "feature", "title": "Add thing" }),
        ))
        .unwrap_err();
        assert!(err.field_errors.contains_key("payload"));
    }

    #[test]
    fn test_unknown_action_is_distinct_from_payload_mismatch() {
        let err = ActionRequest::from_json(request("DELETE_REPO", json!({}))).unwrap_err();
        assert!(err.field_errors.contains_key("action"));
        assert!(!err.field_errors.contains_key("payload"));
    }

    #[test]
    fn test_envelope_errors_are_collected() {
        let err = ActionRequest::from_json(json!({
            "agentId": "",
            "repo": "not-a-repo",
            "action": 5,
        }))
        .unwrap_err();

        let fields: Vec<&str> = err.field_errors.keys().map(String::as_str).collect();
        assert_eq!(fields, ["action", "agentId", "payload", "repo"]);
        assert_eq!(err.details()["fieldErrors"]["agentId"][0], "Must not be empty");
    }

    #[test]
    fn test_non_object_body_is_rejected() {
        let err = ActionRequest::from_json(json!([1, 2, 3])).unwrap_err();
        assert!(err.field_errors.contains_key("body"));
    }

    #[test]
    fn test_repo_format() {
        assert!(RepoName::parse("foo/bar").is_ok());
        assert!(RepoName::parse("foo").is_err());
        assert!(RepoName::parse("foo/bar/baz").is_err());
        assert!(RepoName::parse("/bar").is_err());
        assert!(RepoName::parse("foo/").is_err());

        let repo = RepoName::parse("acme/app").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "app");
    }

    #[test]
    fn test_search_query_minimum_length() {
        let err = Action::from_parts(ActionKind::SearchCode, json!({ "q": "ab" })).unwrap_err();
        assert!(err.field_errors.contains_key("payload.q"));
        assert!(Action::from_parts(ActionKind::SearchCode, json!({ "q": "abc" })).is_ok());
    }

    #[test]
    fn test_add_labels_requires_a_label() {
        let err = Action::from_parts(ActionKind::AddLabels, json!({ "number": 1, "labels": [] }))
            .unwrap_err();
        assert!(err.field_errors.contains_key("payload.labels"));
    }

    #[test]
    fn test_enum_values_are_checked() {
        assert!(Action::from_parts(ActionKind::ListPrs, json!({ "state": "merged" })).is_err());
        let bad_method = json!({ "number": 1, "method": "ff" });
        assert!(Action::from_parts(ActionKind::MergePr, bad_method).is_err());
        assert!(Action::from_parts(ActionKind::MergePr, json!({ "number": "1" })).is_err());
    }

    #[test]
    fn test_action_kind_round_trips_through_str() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>(), Ok(kind));
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
        assert!("get_file".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_payload_schema_lists_required_fields() {
        let schema = payload_schema(ActionKind::PutFile);
        assert_eq!(schema["required"], json!(["path", "content"]));
        assert_eq!(schema["properties"]["baseRef"]["default"], "main");
    }
}
