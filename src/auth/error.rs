use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::repo::StoreError;

pub const MISSING_FIELDS: &str = "Please fill out all fields.";
pub const INVALID_USER_DATA: &str = "Invalid user data";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// Outcome of a failed auth operation. Only `IntoResponse` knows about HTTP.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    Conflict,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::Conflict | AuthError::InvalidCredentials => {
                StatusCode::BAD_REQUEST
            }
            AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => AuthError::Conflict,
            StoreError::Rejected(_) => AuthError::Validation(INVALID_USER_DATA.into()),
            StoreError::Db(e) => AuthError::Internal(anyhow::Error::new(e).context("user store")),
        }
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // No JSON body at all: every field is absent.
            JsonRejection::MissingJsonContentType(_) => {
                AuthError::Validation(MISSING_FIELDS.into())
            }
            other => AuthError::Validation(format!("Invalid request body: {}", other.body_text())),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AuthError::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}
