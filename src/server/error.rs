use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use log::error;
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;
use crate::dispatcher::DispatchError;
use crate::guard::GuardError;
use crate::history::StoreError;

/// Failures reported as `{"detail": ...}` JSON before any stream begins.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid token")]
    Unauthorized,
    #[error("Conversation not found")]
    NotFound,
    #[error("Too many requests")]
    RateLimited,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ApiError::Internal(message) => {
                error!("Request failed: {}", message);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status(), Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(_: AuthError) -> Self {
        ApiError::Unauthorized
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotFound => ApiError::NotFound,
            GuardError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound => ApiError::NotFound,
            DispatchError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_auth_failure_is_the_same_401() {
        for err in [AuthError::Missing, AuthError::Expired, AuthError::Invalid("bad signature".into())] {
            let api: ApiError = err.into();
            assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(api.to_string(), "Invalid token");
        }
    }

    #[test]
    fn store_failures_hide_details() {
        let api: ApiError = DispatchError::Store(StoreError::Backend("redis down".into())).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let missing: ApiError = GuardError::NotFound.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.to_string(), "Conversation not found");
    }
}
