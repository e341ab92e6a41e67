pub mod assets;
pub mod auth;
pub mod health;
pub mod scopes;
pub mod users;

// common helpers for the handlers
use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use super::AppState;
use crate::access::{AccessError, CurrentSession, Role, Session, CSRF_HEADER};

/// Role of the caller, echoed on listing pages so clients can adapt their UI.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserInfo {
    pub role: Role,
}

/// Unwrap a JSON body; any decoding failure is a plain `400`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AccessError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            debug!("Rejected request body: {rejection}");
            Err(AccessError::BadRequest)
        }
    }
}

/// The authenticated caller's session; the guard chain guarantees one exists.
pub(crate) fn require_session(current: &CurrentSession) -> Result<&Session, AccessError> {
    current.get().ok_or(AccessError::Unauthenticated)
}

/// Response headers carrying the session's CSRF token.
pub(crate) fn csrf_headers(state: &AppState, session: &Session) -> Result<HeaderMap, AccessError> {
    let token = state.csrf.issue_token(session)?;
    let mut headers = HeaderMap::new();
    headers.insert(CSRF_HEADER, HeaderValue::from_str(&token)?);
    Ok(headers)
}
