//! Mapping of engine errors onto HTTP responses.

use super::types::{ErrorResponse, error_kind_label};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use footprint_core::{ErrorKind, FootprintError};

/// An error on its way to becoming a JSON response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

/// HTTP status for an engine error.
#[must_use]
pub fn status_for(error: &FootprintError) -> StatusCode {
    match error.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Lookup => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Transaction => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FootprintError> for ApiError {
    fn from(error: FootprintError) -> Self {
        let status = status_for(&error);
        if status.is_server_error() {
            tracing::error!(error = %error, "request failed");
        } else {
            tracing::debug!(error = %error, "request rejected");
        }
        Self::new(status, error_kind_label(&error), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.kind, self.message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::{InstanceId, LookupError, UserId};

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(
            status_for(&FootprintError::InstanceNotFound(InstanceId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&FootprintError::OwnerCannotComplete {
                instance: InstanceId(1),
                user: UserId(1)
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&LookupError::NoActiveDevice(UserId(2)).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&FootprintError::Transaction("busy".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
