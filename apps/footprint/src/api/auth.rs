//! # Authentication Module
//!
//! Two layers:
//!
//! - Optional API key: if `FOOTPRINT_API_KEY` is set, all requests except
//!   `/health` need `Authorization: Bearer <key>`.
//! - Caller identity: user authentication happens at the gateway, which
//!   forwards the authenticated user as `X-User-Id`. Handlers that act on
//!   behalf of a user take the [`CurrentUser`] extractor.

use super::error::ApiError;
use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use footprint_core::UserId;
use subtle::ConstantTimeEq;

/// Header carrying the authenticated user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

/// Get API key from environment variable.
///
/// Returns `Some(key)` if `FOOTPRINT_API_KEY` is set and non-empty,
/// `None` otherwise (disabling authentication).
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("FOOTPRINT_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Compare keys in constant time over a fixed padded length.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let max_len = provided_bytes.len().max(expected_bytes.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided_bytes.len()].copy_from_slice(provided_bytes);
    padded_expected[..expected_bytes.len()].copy_from_slice(expected_bytes);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided_bytes.len() == expected_bytes.len()
}

/// API key authentication middleware.
pub async fn api_key_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = get_api_key_from_env() else {
        return Ok(next.run(request).await);
    };

    // Load balancer health checks stay open.
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(header_value) => {
            let provided_key = header_value.strip_prefix("Bearer ").unwrap_or(header_value);
            if keys_match(provided_key, &expected) {
                Ok(next.run(request).await)
            } else {
                tracing::warn!(
                    event = "auth_failure",
                    reason = "invalid_api_key",
                    "Authentication failed: invalid API key"
                );
                Err(ApiError::unauthorized("invalid API key"))
            }
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Missing Authorization header"
            );
            Err(ApiError::unauthorized("missing Authorization header"))
        }
    }
}

// =============================================================================
// CALLER IDENTITY
// =============================================================================

/// The authenticated user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
            return Err(ApiError::unauthorized("missing X-User-Id header"));
        };
        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|id| CurrentUser(UserId(id)))
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "invalid_input",
                    "X-User-Id must be an unsigned integer",
                )
            })
    }
}

// =============================================================================
// TESTS
// =============================================================================
