//! Access-control failures and their HTTP mapping.
//!
//! Callers must be able to tell the four failure classes apart by status code
//! alone: `400` (bad input, missing referenced record, CSRF failure), `401` (no
//! session), `403` (gate failed, or bad credentials at login) and `500`
//! (storage failure). Bodies never explain *why* a gate failed.

use axum::{
    http::{header::InvalidHeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::storage::StorageError;

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Wrong account or password";
pub const UNAUTHENTICATED_MESSAGE: &str = "Please login first";

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no authenticated session")]
    Unauthenticated,
    #[error("permission denied")]
    Forbidden,
    #[error("missing or invalid csrf token")]
    CsrfRejected,
    #[error("malformed request")]
    BadRequest,
    #[error("referenced record does not exist")]
    NotFound,
    #[error("storage failure: {0}")]
    Internal(#[from] StorageError),
    #[error("invalid response header: {0}")]
    Header(#[from] InvalidHeaderValue),
}

impl AccessError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::CsrfRejected | Self::BadRequest | Self::NotFound => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Header(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a single-record lookup failure: a missing record is the caller's
    /// mistake, anything else is ours.
    #[must_use]
    pub fn from_lookup(err: StorageError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::Internal(err)
        }
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::InvalidCredentials => (status, INVALID_CREDENTIALS_MESSAGE).into_response(),
            Self::Unauthenticated => (status, UNAUTHENTICATED_MESSAGE).into_response(),
            Self::Internal(err) => {
                error!("Storage failure while handling request: {err}");
                status.into_response()
            }
            Self::Header(err) => {
                error!("Failed to build response header: {err}");
                status.into_response()
            }
            _ => status.into_response(),
        }
    }
}
