use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// One invalid field in a request, as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

/// Every failure the service can surface. Errors are built at the point of
/// detection and cross layers unchanged; only `into_response` knows about
/// status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("unique field conflict")]
    Conflict(Vec<FieldError>),
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("{0}")]
    NotFound(String),
    #[error("invalid credentials")]
    Unauthorized,
    #[error("invalid date, expected format {0}")]
    InvalidDate(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(errors) | ApiError::Conflict(errors) => {
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            }
            ApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                Json(vec![FieldError::new("password", "minimum 6 characters")]),
            )
                .into_response(),
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorBody { message })).into_response()
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    message: "invalid credentials".into(),
                }),
            )
                .into_response(),
            ApiError::InvalidDate(expected) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    message: format!("invalid date, expected format {expected}"),
                }),
            )
                .into_response(),
            ApiError::Internal(err) => {
                error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        message: "internal server error".into(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_wire_shape() {
        let err = FieldError::new("email", "email already in use");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"field": "email", "message": "email already in use"})
        );
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::Validation(vec![]), StatusCode::BAD_REQUEST),
            (ApiError::Conflict(vec![]), StatusCode::BAD_REQUEST),
            (ApiError::WeakPassword, StatusCode::BAD_REQUEST),
            (ApiError::NotFound("user not found".into()), StatusCode::NOT_FOUND),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ApiError::InvalidDate("YYYY-MM-DDTHH:MM:SS"),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Internal(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn unauthorized_carries_no_field_detail() {
        // Generic message only; no field list that would reveal whether
        // the identifier existed.
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({"message": "invalid credentials"}));
    }
}
