//! GitHub webhook receiver.
//!
//! Events are authenticated and acknowledged. Nothing is dispatched and the
//! payload is never logged.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::security::verify_signature;
use crate::server::AppState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /github/webhook`
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Json<Value>> {
    let secret = state
        .config
        .webhook_secret
        .as_deref()
        .ok_or_else(|| GatewayError::Configuration("Webhook secret not configured".to_string()))?;

    if !verify_signature(&body, header(&headers, SIGNATURE_HEADER), secret) {
        return Err(GatewayError::Unauthorized(
            "Invalid webhook signature".to_string(),
        ));
    }

    let event = header(&headers, EVENT_HEADER).unwrap_or("unknown");
    let delivery = header(&headers, DELIVERY_HEADER).unwrap_or("unknown");
    info!(event = %event, delivery = %delivery, bytes = body.len(), "Webhook received");

    Ok(Json(json!({ "ok": true })))
}
