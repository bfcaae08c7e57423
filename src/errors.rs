use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "validation",
            AppError::Engine(error) => error.kind(),
            AppError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => make_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error".to_owned(),
                "invalid_request",
                message,
            ),
            AppError::Engine(error) => make_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}_error", error.kind()),
                "internal_error",
                error.client_message(),
            ),
            AppError::Internal(message) => make_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error".to_owned(),
                "internal_error",
                message,
            ),
        }
    }
}

fn make_error_response(
    status: StatusCode,
    error_type: String,
    code: &'static str,
    message: String,
) -> Response {
    let payload = ErrorEnvelope {
        error: ErrorBody {
            message,
            error_type,
            code,
        },
    };

    (status, Json(payload)).into_response()
}
