use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every failure a handler can report. Rendered as
/// `{"error": <message>, "statusCode": <code>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Not allowed")]
    Unauthorized,

    #[error(
        "Secret not found - This usually means the secret link has already been visited and therefore no longer exists."
    )]
    SecretNotFound,

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("\"{0}\" is already in use. Please use another alias.")]
    AliasTaken(String),

    #[error("Could not find db connection")]
    StoreUnavailable,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SecretNotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::AliasTaken(_) => StatusCode::CONFLICT,
            Self::StoreUnavailable | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Internal(e) => tracing::error!(error = %format!("{e:#}"), "internal error"),
            Self::StoreUnavailable => tracing::error!("request rejected: store unavailable"),
            _ => {}
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "statusCode": status.as_u16() })),
        )
            .into_response()
    }
}

/// Fallback for verbs a route does not serve.
pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::InvalidInput("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::SecretNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ApiError::StoreUnavailable.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::AliasTaken("a".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = ApiError::from(anyhow::anyhow!("redb exploded at /var/lib/scrt"));
        assert_eq!(err.to_string(), "internal server error");
    }
}
