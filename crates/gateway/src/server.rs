//! HTTP server for the agent gateway.
//!
//! Provides REST API endpoints for:
//! - Executing agent actions behind the admission checks
//! - Receiving GitHub webhooks
//! - Health checks and the OpenAPI document

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::actions::ActionRequest;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{self, ActionOutcome};
use crate::error::{GatewayError, GatewayResult};
use crate::github_client::RepositoryHost;
use crate::idempotency::{Claim, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore};
use crate::openapi;
use crate::security::{client_ip, rate_key, verify_signature, RateLimiter, TokenVerifier};
use crate::webhooks;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Server state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// Repository host used for dispatch
    pub host: Arc<dyn RepositoryHost>,
    pub rate_limiter: RateLimiter,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub tokens: TokenVerifier,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, host: Arc<dyn RepositoryHost>) -> Self {
        Self::with_clock(config, host, Arc::new(SystemClock))
    }

    /// State whose rate windows and idempotency records follow `clock`.
    #[must_use]
    pub fn with_clock(
        config: Config,
        host: Arc<dyn RepositoryHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rate_limiter = RateLimiter::with_clock(config.rate_limit, Arc::clone(&clock));
        let idempotency = Arc::new(InMemoryIdempotencyStore::with_clock(clock));
        let tokens = TokenVerifier::new(config.jwt_secret.clone());
        Self {
            config: Arc::new(config),
            host,
            rate_limiter,
            idempotency,
            tokens,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health_handler))
        .route("/openapi", get(openapi_handler))
        .route("/agent/execute", post(execute_handler))
        .route("/github/webhook", post(webhooks::receive))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

fn make_request_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        agent_id = field::Empty,
        action = field::Empty,
        repo = field::Empty,
    )
}

/// Start the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to bind to the address.
pub async fn run_server(state: Arc<AppState>, addr: &str) -> std::io::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Agent gateway listening on {addr}");

    axum::serve(listener, app).await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

async fn openapi_handler() -> impl IntoResponse {
    Json(openapi::document())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `POST /agent/execute`
///
/// Checks run in a fixed order and the first failure answers the request:
/// signature, JSON, schema, rate limit, bearer token, allowlist, then the
/// idempotency claim.
async fn execute_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    if !verify_signature(
        &body,
        header_str(&headers, SIGNATURE_HEADER),
        &state.config.shared_secret,
    ) {
        return Err(GatewayError::Unauthorized("Invalid HMAC signature".to_string()));
    }

    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| GatewayError::BadRequest("Invalid JSON".to_string()))?;
    let request = ActionRequest::from_json(value)?;
    let kind = request.action.kind();

    let span = Span::current();
    span.record("agent_id", request.agent_id.as_str());
    span.record("action", kind.as_str());
    span.record("repo", field::display(&request.repo));

    let decision = state
        .rate_limiter
        .check(&rate_key(&request.agent_id, &client_ip(&headers)))
        .await;
    if !decision.allowed {
        return Err(GatewayError::RateLimited {
            reset_at: decision.reset_at,
            retry_after_secs: decision.retry_after_secs,
        });
    }

    // A header that is not valid UTF-8 cannot hold a bearer token.
    let authorization = headers
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default());
    state
        .tokens
        .verify(authorization)
        .map_err(|e| GatewayError::Unauthorized(e.to_string()))?;

    if !state.config.allowlist.allows(&request.repo.to_string()) {
        return Err(GatewayError::Forbidden("Repository not allowed".to_string()));
    }

    let idempotency_key = header_str(&headers, IDEMPOTENCY_HEADER)
        .filter(|k| !k.is_empty() && state.config.is_idempotent(kind));

    let outcome = match idempotency_key {
        Some(key) => match state.idempotency.claim(key, state.config.idempotency_ttl).await {
            Claim::Replay(record) => {
                info!(status = record.status, "Replaying idempotent response");
                return Ok(replay(&record));
            }
            Claim::InFlight => {
                return Err(GatewayError::Conflict(
                    "A request with this Idempotency-Key is still in progress".to_string(),
                ));
            }
            Claim::Acquired => execute_claimed(&state, key.to_string(), request).await?,
        },
        None => dispatch::execute(state.host.as_ref(), &request.repo, &request.action).await?,
    };

    info!(status = outcome.status, "Action completed");
    Ok(json_response(outcome.status, outcome.body))
}

/// Run a claimed action in its own task so that a dropped connection still
/// finishes the call and settles the claim.
async fn execute_claimed(
    state: &Arc<AppState>,
    key: String,
    request: ActionRequest,
) -> GatewayResult<ActionOutcome> {
    let host = Arc::clone(&state.host);
    let store = Arc::clone(&state.idempotency);
    let ttl = state.config.idempotency_ttl;
    let ActionRequest { repo, action, .. } = request;
    let task_key = key.clone();

    let task = tokio::spawn(
        async move {
            let result = dispatch::execute(host.as_ref(), &repo, &action).await;
            match &result {
                Ok(outcome) => {
                    store
                        .set(
                            &task_key,
                            outcome.status,
                            outcome.body.clone(),
                            json_headers(),
                            ttl,
                        )
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Idempotent action failed; releasing key");
                    store.release(&task_key).await;
                }
            }
            result
        }
        .in_current_span(),
    );

    match task.await {
        Ok(result) => Ok(result?),
        Err(e) => {
            // The task died before settling the claim.
            state.idempotency.release(&key).await;
            Err(GatewayError::Internal(format!("Action task failed: {e}")))
        }
    }
}

fn json_headers() -> BTreeMap<String, String> {
    BTreeMap::from([(
        header::CONTENT_TYPE.as_str().to_string(),
        "application/json".to_string(),
    )])
}

fn json_response(status: u16, body: Value) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    (status, Json(body)).into_response()
}

fn replay(record: &IdempotencyRecord) -> Response {
    let mut response = json_response(record.status, record.body.clone());
    for (name, value) in &record.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
