//! # Request Admission Controls
//!
//! Signature verification, rate limiting, optional bearer tokens and the
//! repository allowlist. Each check is independent so the gateway can compose
//! them in a fixed order and each can be tested alone.

pub mod allowlist;
pub mod rate_limit;
pub mod signature;
pub mod tokens;

pub use allowlist::RepoAllowlist;
pub use rate_limit::{client_ip, rate_key, RateDecision, RateLimitConfig, RateLimiter};
pub use signature::{sign, verify_signature};
pub use tokens::{TokenError, TokenVerifier};
