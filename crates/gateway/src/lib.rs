#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

//! Agent repository gateway.
//!
//! A signed HTTP endpoint through which automated agents perform a fixed set
//! of GitHub operations on allowlisted repositories:
//!
//! - **Admission** - raw-body HMAC signatures, per agent and IP rate limits,
//!   optional bearer JWTs, and the repository allowlist
//! - **Idempotency** - side-effecting actions run at most once per key
//! - **Dispatch** - typed actions mapped onto the GitHub REST API
//! - **Webhooks** - authenticated receipt of GitHub events
//!
//! ## Request flow
//!
//! ```text
//! raw body -> signature -> JSON -> schema -> rate limit -> token
//!          -> allowlist -> idempotency claim -> GitHub -> response
//! ```

pub mod actions;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod github_client;
pub mod idempotency;
pub mod openapi;
pub mod security;
pub mod server;
pub mod webhooks;

pub use actions::{Action, ActionError, ActionKind, ActionRequest, RepoName};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CommitAuthor, Config, ConfigError, GitHubAuth, LogFormat};
pub use dispatch::ActionOutcome;
pub use error::{ErrorCode, GatewayError, GatewayResult};
pub use github_client::{GitHubClient, GitHubError, GitHubResult, RepositoryHost};
pub use idempotency::{Claim, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore};
pub use server::{build_router, run_server, AppState};
