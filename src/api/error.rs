//! APIエラー → HTTPレスポンス
//!
//! 本文は常に `{"success": false, "error": "..."}`。

use crate::error::BoqError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// セッション状態の不一致
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<BoqError> for ApiError {
    fn from(err: BoqError) -> Self {
        let message = err.to_string();
        match err {
            BoqError::InvalidRequest(_)
            | BoqError::NoHeaderFound(_)
            | BoqError::NoProcessableSheet(_)
            | BoqError::WorkbookRead(_)
            | BoqError::JsonParse(_)
            | BoqError::Common(_) => ApiError::BadRequest(message),
            BoqError::SessionNotFound(_) | BoqError::FileNotFound(_) | BoqError::MasterItemNotFound(_) => {
                ApiError::NotFound(message)
            }
            BoqError::InvalidSessionState { .. } => ApiError::Conflict(message),
            BoqError::Config(_) | BoqError::DatabaseUnavailable(_) | BoqError::WorkbookWrite(_) | BoqError::Io(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", err))
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::BadRequest(format!("invalid multipart body: {}", rejection.body_text()))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(format!("invalid path parameter: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BoqError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (BoqError::MasterItemNotFound(3), StatusCode::NOT_FOUND),
            (BoqError::InvalidRequest("bad".into()), StatusCode::BAD_REQUEST),
            (
                BoqError::InvalidSessionState { expected: "processed".into(), actual: "created".into() },
                StatusCode::CONFLICT,
            ),
            (BoqError::DatabaseUnavailable("locked".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_session_not_found_message() {
        let err = ApiError::from(BoqError::SessionNotFound("abc".into()));
        assert_eq!(err.to_string(), "session not found");
    }
}
