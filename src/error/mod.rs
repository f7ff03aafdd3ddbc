use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::routing::TemplateError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Route template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Template(_) => "ROUTE_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Message returned to the client. Server-side detail is hidden in
    /// production.
    fn client_message(&self) -> String {
        match self {
            AppError::NotFound(msg) => msg.clone(),
            AppError::Template(_) if is_production() => "Internal server error".to_string(),
            AppError::Template(e) => e.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code = code, status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = code, status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
