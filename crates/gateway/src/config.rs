//! Startup configuration read from environment variables.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Duration;
use std::collections::HashSet;
use thiserror::Error;

use crate::actions::ActionKind;
use crate::github_client::GITHUB_API_URL;
use crate::idempotency::DEFAULT_TTL_SECS;
use crate::security::{RateLimitConfig, RepoAllowlist};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_AUTHOR_NAME: &str = "Agent Gateway Bot";
pub const DEFAULT_AUTHOR_EMAIL: &str = "agent-gateway-bot@users.noreply.github.com";

/// Problems found while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} is required when GITHUB_MODE={mode}")]
    MissingForMode {
        name: &'static str,
        mode: &'static str,
    },

    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// How the gateway authenticates to GitHub.
#[derive(Clone, PartialEq, Eq)]
pub enum GitHubAuth {
    /// Personal access token.
    Token(String),
    /// GitHub App installation.
    App {
        app_id: u64,
        private_key_pem: String,
        installation_id: u64,
    },
}

impl std::fmt::Debug for GitHubAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(..)"),
            Self::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Identity written as author and committer on file commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: DEFAULT_AUTHOR_NAME.to_string(),
            email: DEFAULT_AUTHOR_EMAIL.to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Gateway configuration.
#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub github_api_url: String,
    pub github_auth: GitHubAuth,
    pub author: CommitAuthor,
    pub webhook_secret: Option<String>,
    pub shared_secret: String,
    pub jwt_secret: Option<String>,
    pub allowlist: RepoAllowlist,
    pub rate_limit: RateLimitConfig,
    pub idempotency_ttl: Duration,
    pub idempotent_actions: HashSet<ActionKind>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("github_api_url", &self.github_api_url)
            .field("github_auth", &self.github_auth)
            .field("author", &self.author)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| ".."))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| ".."))
            .field("allowlist", &self.allowlist.len())
            .field("rate_limit", &self.rate_limit)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .field("idempotent_actions", &self.idempotent_actions)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let shared_secret =
            get("AGENT_SHARED_SECRET").ok_or(ConfigError::Missing("AGENT_SHARED_SECRET"))?;
        let allowlist = RepoAllowlist::from_csv(
            &get("REPO_ALLOWLIST").ok_or(ConfigError::Missing("REPO_ALLOWLIST"))?,
        );

        let github_auth = match get("GITHUB_MODE").as_deref().map(str::trim) {
            Some("PAT") => GitHubAuth::Token(get("GH_TOKEN").ok_or(
                ConfigError::MissingForMode {
                    name: "GH_TOKEN",
                    mode: "PAT",
                },
            )?),
            Some("APP") => {
                let require = |name: &'static str| {
                    get(name).ok_or(ConfigError::MissingForMode { name, mode: "APP" })
                };
                let app_id = parse_number("GH_APP_ID", &require("GH_APP_ID")?)?;
                let private_key_pem = decode_pem(&require("GH_APP_PRIVATE_KEY")?)?;
                let installation_id =
                    parse_number("GH_APP_INSTALLATION_ID", &require("GH_APP_INSTALLATION_ID")?)?;
                GitHubAuth::App {
                    app_id,
                    private_key_pem,
                    installation_id,
                }
            }
            Some(other) => {
                return Err(ConfigError::invalid(
                    "GITHUB_MODE",
                    format!("expected PAT or APP, got '{other}'"),
                ))
            }
            None => return Err(ConfigError::Missing("GITHUB_MODE")),
        };

        let port = match get("PORT") {
            Some(v) => parse_number("PORT", &v)?,
            None => DEFAULT_PORT,
        };

        let defaults = RateLimitConfig::default();
        let max_requests = match get("RATE_LIMIT_MAX") {
            Some(v) => parse_number("RATE_LIMIT_MAX", &v)?,
            None => defaults.max_requests,
        };
        if max_requests == 0 {
            return Err(ConfigError::invalid("RATE_LIMIT_MAX", "must be at least 1"));
        }
        let window = match get("RATE_LIMIT_WINDOW_SECS") {
            Some(v) => Duration::seconds(positive_secs("RATE_LIMIT_WINDOW_SECS", &v)?),
            None => defaults.window,
        };

        let idempotency_ttl = Duration::seconds(match get("IDEMPOTENCY_TTL_SECS") {
            Some(v) => positive_secs("IDEMPOTENCY_TTL_SECS", &v)?,
            None => DEFAULT_TTL_SECS,
        });

        let idempotent_actions = match get("IDEMPOTENT_ACTIONS") {
            Some(v) => parse_actions(&v)?,
            None => HashSet::from([ActionKind::PutFile, ActionKind::OpenPr]),
        };

        let defaults = CommitAuthor::default();
        let author = CommitAuthor {
            name: get("GIT_AUTHOR_NAME").unwrap_or(defaults.name),
            email: get("GIT_AUTHOR_EMAIL").unwrap_or(defaults.email),
        };

        let log_format = match get("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            Some("text" | "pretty") | None => LogFormat::Text,
            Some(other) => {
                return Err(ConfigError::invalid(
                    "LOG_FORMAT",
                    format!("expected json or text, got '{other}'"),
                ))
            }
        };

        Ok(Self {
            port,
            github_api_url: get("GITHUB_API_URL").unwrap_or_else(|| GITHUB_API_URL.to_string()),
            github_auth,
            author,
            webhook_secret: get("GH_WEBHOOK_SECRET"),
            shared_secret,
            jwt_secret: get("AGENT_JWT_SECRET"),
            allowlist,
            rate_limit: RateLimitConfig {
                max_requests,
                window,
            },
            idempotency_ttl,
            idempotent_actions,
            log_format,
        })
    }

    /// Whether responses to `kind` are cached under an idempotency key.
    #[must_use]
    pub fn is_idempotent(&self, kind: ActionKind) -> bool {
        self.idempotent_actions.contains(&kind)
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string()))
}

fn positive_secs(name: &'static str, value: &str) -> Result<i64, ConfigError> {
    let secs: i64 = parse_number(name, value)?;
    if secs <= 0 {
        return Err(ConfigError::invalid(name, "must be a positive number of seconds"));
    }
    Ok(secs)
}

fn decode_pem(encoded: &str) -> Result<String, ConfigError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| ConfigError::invalid("GH_APP_PRIVATE_KEY", format!("not base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| ConfigError::invalid("GH_APP_PRIVATE_KEY", "decoded key is not UTF-8"))
}

fn parse_actions(csv: &str) -> Result<HashSet<ActionKind>, ConfigError> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|e: String| ConfigError::invalid("IDEMPOTENT_ACTIONS", e)))
        .collect()
}
