//! HMAC-SHA256 request signatures over raw bodies.
//!
//! Both the agent gateway (`X-Signature`) and the GitHub webhook receiver
//! (`X-Hub-Signature-256`) use the same `sha256=<hex>` header format, each with
//! its own secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for `body` under `secret`.
///
/// # Returns
/// `sha256=` followed by the lowercase hex HMAC-SHA256 digest.
#[must_use]
pub fn sign(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a detached signature against the exact bytes received.
///
/// # Arguments
/// * `body` - Raw request body, before any parsing
/// * `provided` - Signature header value, if the header was sent
/// * `secret` - Shared signing secret
///
/// # Returns
/// `true` only if the header is present and equals the expected value.
/// A missing header is never treated as "no signature required".
#[must_use]
pub fn verify_signature(body: &[u8], provided: Option<&str>, secret: &str) -> bool {
    let Some(provided) = provided else {
        return false;
    };
    let expected = sign(body, secret);
    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

/// Compare two byte strings without branching on their contents.
///
/// Lengths are compared first (lengths are not secret); equal-length inputs
/// are always compared in full.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
