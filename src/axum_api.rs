use crate::action::ActionType;
use crate::errors::RateLimitError;
use crate::identifier::{email_identifier, ip_identifier};
use crate::rate_limit::{status_for, CheckOptions, RateLimitStatus, RateLimiter};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: Arc<RateLimiter>,
    /// Honour the `identifier` field. Only for routers reachable by trusted
    /// server-side callers; a public client could rotate it freely.
    pub trust_client_identifier: bool,
}

/// Who the request is about. On a trusted router an explicit identifier wins
/// over an email; with neither, the client IP is used.
#[derive(Debug, Default, Deserialize)]
pub struct IdentifierRequest {
    pub identifier: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRateLimitResponse {
    pub rate_limited: bool,
    pub reset_time: u64,
    pub attempts_remaining: u32,
    pub formatted_time: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResponse {
    pub success: bool,
    pub attempts_remaining: u32,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            // an unknown account must look like any other failure to the client
            RateLimitError::RedisError(_)
            | RateLimitError::StorageUnavailable(_)
            | RateLimitError::UserNotFound => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Unable to check rate limit status.",
            ),
            RateLimitError::InvalidActionType(_) => (StatusCode::BAD_REQUEST, "Unknown action type"),
            RateLimitError::MissingIdentifier => {
                (StatusCode::BAD_REQUEST, "An identifier or email is required")
            }
            RateLimitError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
            }
            RateLimitError::ConfigError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        if status.is_server_error() {
            error!("Rate limit request failed: {}", self);
        }

        if let RateLimitError::RateLimitExceeded { retry_after_ms } = self {
            let retry_after = retry_after_ms.div_ceil(1000);
            let body = Json(serde_json::json!({
                "error": error_message,
                "resetTime": retry_after_ms,
                "retryAfter": retry_after,
            }));
            let mut response = (status, body).into_response();
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            return response;
        }

        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

/// First address in `x-forwarded-for`, falling back to `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(ip_identifier);

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(ip_identifier)
    })
}

fn resolve_identifier(
    headers: &HeaderMap,
    request: &IdentifierRequest,
    trust_client_identifier: bool,
) -> Result<String, RateLimitError> {
    let explicit = request
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|s| trust_client_identifier && !s.is_empty());
    if let Some(identifier) = explicit {
        return Ok(identifier.to_string());
    }
    if let Some(email) = request
        .email
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Ok(email_identifier(email));
    }
    client_ip(headers).ok_or(RateLimitError::MissingIdentifier)
}

pub async fn check_rate_limit(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<IdentifierRequest>,
) -> Result<Json<CheckRateLimitResponse>, RateLimitError> {
    let action: ActionType = action.parse()?;
    let identifier =
        resolve_identifier(&headers, &payload, state.trust_client_identifier)?;

    let decision = state
        .rate_limiter
        .check(&identifier, action, CheckOptions::advisory())
        .await?;

    let status = status_for(action, decision.reset_time);

    Ok(Json(CheckRateLimitResponse {
        rate_limited: !decision.allowed,
        reset_time: decision.reset_time,
        attempts_remaining: decision.attempts_remaining,
        formatted_time: status.formatted_time,
        message: status.message,
    }))
}

pub async fn record_attempt(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<IdentifierRequest>,
) -> Result<Json<AttemptResponse>, RateLimitError> {
    let action: ActionType = action.parse()?;
    let identifier =
        resolve_identifier(&headers, &payload, state.trust_client_identifier)?;

    let decision = state.rate_limiter.enforce(&identifier, action).await?;

    Ok(Json(AttemptResponse {
        success: true,
        attempts_remaining: decision.attempts_remaining,
    }))
}

pub async fn rate_limit_status(
    State(state): State<AppState>,
    Path(action): Path<String>,
    headers: HeaderMap,
    Query(query): Query<IdentifierRequest>,
) -> Result<Json<RateLimitStatus>, RateLimitError> {
    let action: ActionType = action.parse()?;
    let identifier =
        resolve_identifier(&headers, &query, state.trust_client_identifier)?;

    let status = state.rate_limiter.status(&identifier, action).await?;
    Ok(Json(status))
}

/// Router for public clients. Requests are keyed by email or client IP; the
/// `identifier` field is ignored.
pub fn rate_limit_router(rate_limiter: Arc<RateLimiter>) -> Router {
    router_with_state(AppState {
        rate_limiter,
        trust_client_identifier: false,
    })
}

/// Router for server-side callers that pick identifiers themselves. Never
/// expose it to browsers.
pub fn trusted_rate_limit_router(rate_limiter: Arc<RateLimiter>) -> Router {
    router_with_state(AppState {
        rate_limiter,
        trust_client_identifier: true,
    })
}

fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/{action}/check-rate-limit", post(check_rate_limit))
        .route("/{action}/attempt", post(record_attempt))
        .route("/{action}/status", get(rate_limit_status))
        .with_state(state)
}
