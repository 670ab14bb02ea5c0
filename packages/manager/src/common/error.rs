//! Error taxonomy shared by the repository, service, and HTTP layers.
//!
//! Repository code wraps driver errors with operation context and returns
//! not-found as a distinct variant. The HTTP layer maps variants to status
//! codes and a JSON `{code, message}` body; raw driver text never reaches
//! clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not {action}: job is {status}")]
    InvalidTransition {
        status: String,
        action: &'static str,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("dependency unavailable: {0}")]
    DependencyDown(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Wrap a driver error with the operation that failed.
    pub fn db(context: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Error {
        let context = context.into();
        move |source| match source {
            sqlx::Error::RowNotFound => Error::NotFound("row"),
            source => Error::Database { context, source },
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidTransition { .. } | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::DependencyDown(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Cancelled | Error::Database { .. } | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to expose over HTTP.
    fn public_message(&self) -> String {
        match self {
            Error::Database { .. } | Error::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// JSON error body returned by every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}
