//! Session-bound anti-forgery tokens.
//!
//! A token is `HMAC-SHA256(secret, session id ":" session csrf secret)`, encoded
//! as unpadded base64url. The process-wide secret never changes at runtime, so a
//! session keeps the same token for its whole life; a new session (login) or a
//! removed one (logout) invalidates it.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderName, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use super::{session::CurrentSession, AccessError, Session};

pub const CSRF_HEADER: HeaderName = HeaderName::from_static("x-csrf-token");
pub const CSRF_FIELD: &str = "_csrf";

const MAX_FORM_BYTES: usize = 1024 * 1024;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CsrfGuard {
    secret: Arc<SecretString>,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }

    fn mac(&self, session: &Session) -> Result<HmacSha256, AccessError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| AccessError::CsrfRejected)?;
        mac.update(session.id.as_bytes());
        mac.update(b":");
        mac.update(session.csrf_secret.as_bytes());
        Ok(mac)
    }

    /// Derive the token for a session. Pure: nothing is stored.
    ///
    /// # Errors
    /// Returns `AccessError::CsrfRejected` if the key cannot be loaded.
    pub fn issue_token(&self, session: &Session) -> Result<String, AccessError> {
        let tag = self.mac(session)?.finalize().into_bytes();
        Ok(Base64UrlUnpadded::encode_string(&tag))
    }

    /// Check a submitted token against the current session.
    ///
    /// # Errors
    /// Returns `AccessError::CsrfRejected` when there is no session, no token,
    /// or the token does not match.
    pub fn verify(
        &self,
        session: Option<&Session>,
        submitted: Option<&str>,
    ) -> Result<(), AccessError> {
        let (Some(session), Some(submitted)) = (session, submitted) else {
            return Err(AccessError::CsrfRejected);
        };
        let tag =
            Base64UrlUnpadded::decode_vec(submitted.trim()).map_err(|_| AccessError::CsrfRejected)?;
        self.mac(session)?
            .verify_slice(&tag)
            .map_err(|_| AccessError::CsrfRejected)
    }
}

/// Verbs that change state and therefore need a token.
#[must_use]
pub fn requires_token(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn token_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(&CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn token_from_pairs(raw: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(raw)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned())
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

/// Middleware: reject state-changing requests without a valid token.
///
/// The token is taken from the `X-CSRF-TOKEN` header, then the `_csrf` query
/// parameter, then the `_csrf` field of a urlencoded form body. Must run after
/// [`super::session::load`] and before any handler or gate.
pub async fn enforce(State(guard): State<CsrfGuard>, request: Request, next: Next) -> Response {
    if !requires_token(request.method()) {
        return next.run(request).await;
    }

    let session = request
        .extensions()
        .get::<CurrentSession>()
        .and_then(|current| current.get().cloned());

    let mut submitted = token_from_header(request.headers()).or_else(|| {
        request
            .uri()
            .query()
            .and_then(|query| token_from_pairs(query.as_bytes()))
    });

    let request = if submitted.is_none() && is_form(request.headers()) {
        let (parts, body) = request.into_parts();
        let Ok(bytes) = to_bytes(body, MAX_FORM_BYTES).await else {
            return AccessError::BadRequest.into_response();
        };
        submitted = token_from_pairs(&bytes);
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    match guard.verify(session.as_ref(), submitted.as_deref()) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(
                method = %request.method(),
                path = %request.uri().path(),
                "Rejected request without a valid CSRF token"
            );
            err.into_response()
        }
    }
}
