//! Cookie-backed session slots.
//!
//! Flow Overview:
//! 1) Every request on the API router resolves its session cookie into an
//!    optional [`Session`] and carries it as a [`CurrentSession`] extension.
//! 2) The login page opens an anonymous slot so a CSRF token can be issued
//!    before anyone is authenticated.
//! 3) A successful login replaces that slot with a fresh one carrying the
//!    caller's [`Identity`]; logout removes the slot and expires the cookie.
//! 4) Opening any slot first purges expired ones, so slots whose cookie never
//!    comes back do not pile up.
//!
//! Only a SHA-256 digest of the cookie value is ever used as the slot key, so a
//! leaked session table cannot be replayed as cookies.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{
        header::{InvalidHeaderValue, COOKIE},
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::debug;

use super::{AccessError, Identity};
use crate::storage::{with_deadline, StorageError};

pub const SESSION_COOKIE_NAME: &str = "riskassess_session";

const DEFAULT_SESSION_TTL_SECONDS: i64 = 60 * 60;

/// Server-side state of one client's session slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Hex digest of the cookie token; the store key.
    pub id: String,
    /// `None` while the slot is anonymous.
    pub identity: Option<Identity>,
    /// Per-session input to the CSRF token derivation.
    pub csrf_secret: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A freshly created slot together with the raw token for the cookie.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub token: String,
}

/// The session slot resolved for the current request, if any.
#[derive(Clone, Debug, Default)]
pub struct CurrentSession(pub Option<Session>);

impl CurrentSession {
    #[must_use]
    pub fn get(&self) -> Option<&Session> {
        self.0.as_ref()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session: &Session) -> Result<(), StorageError>;
    async fn load(&self, id: &str) -> Result<Option<Session>, StorageError>;
    async fn remove(&self, id: &str) -> Result<(), StorageError>;
    /// Drop every slot expired at `now`, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slots: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let mut slots = self.slots.write().await;
        slots.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Session>, StorageError> {
        let slots = self.slots.read().await;
        Ok(slots.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.write().await;
        slots.remove(id);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, session| !session.is_expired(now));
        Ok(u64::try_from(before - slots.len()).unwrap_or(u64::MAX))
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    ttl_seconds: i64,
    cookie_secure: bool,
    deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            cookie_secure: false,
            deadline: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Resolve the request's cookie into its session slot.
    ///
    /// Missing cookies, unknown tokens and expired slots all resolve to `None`.
    ///
    /// # Errors
    /// Returns `AccessError::Internal` if the session store fails.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Session>, AccessError> {
        let Some(token) = extract_session_token(headers) else {
            return Ok(None);
        };
        let id = hash_session_token(&token);
        let Some(session) = with_deadline(self.config.deadline, self.store.load(&id)).await? else {
            return Ok(None);
        };
        if session.is_expired(Utc::now()) {
            debug!("Dropping expired session slot");
            with_deadline(self.config.deadline, self.store.remove(&id)).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Open an anonymous slot, used to carry a CSRF token before login.
    ///
    /// # Errors
    /// Returns an error if a token cannot be generated or the slot cannot be saved.
    pub async fn open(&self) -> Result<IssuedSession, AccessError> {
        self.issue(None).await
    }

    /// Bind an identity to a fresh slot, discarding whatever slot the client had.
    ///
    /// # Errors
    /// Returns `AccessError::Internal` if the session store fails.
    pub async fn establish(
        &self,
        prior: Option<&Session>,
        identity: Identity,
    ) -> Result<IssuedSession, AccessError> {
        if let Some(prior) = prior {
            with_deadline(self.config.deadline, self.store.remove(&prior.id)).await?;
        }
        self.issue(Some(identity)).await
    }

    /// The caller's identity, or `Unauthenticated` for anonymous or missing slots.
    ///
    /// # Errors
    /// Returns `AccessError::Unauthenticated` when no identity is attached.
    pub fn current(session: Option<&Session>) -> Result<Identity, AccessError> {
        session
            .and_then(|session| session.identity)
            .ok_or(AccessError::Unauthenticated)
    }

    /// Remove the slot. The caller must also send [`SessionManager::expired_cookie`].
    ///
    /// # Errors
    /// Returns `AccessError::Internal` if the session store fails.
    pub async fn terminate(&self, session: Option<&Session>) -> Result<(), AccessError> {
        if let Some(session) = session {
            with_deadline(self.config.deadline, self.store.remove(&session.id)).await?;
        }
        Ok(())
    }

    /// Reclaim expired slots, including ones whose cookie never comes back.
    ///
    /// # Errors
    /// Returns `AccessError::Internal` if the session store fails.
    pub async fn purge_expired(&self) -> Result<u64, AccessError> {
        let purged =
            with_deadline(self.config.deadline, self.store.purge_expired(Utc::now())).await?;
        if purged > 0 {
            debug!(purged, "Purged expired session slots");
        }
        Ok(purged)
    }

    async fn issue(&self, identity: Option<Identity>) -> Result<IssuedSession, AccessError> {
        self.purge_expired().await?;
        let token = generate_token();
        let session = Session {
            id: hash_session_token(&token),
            identity,
            csrf_secret: generate_token(),
            expires_at: Utc::now() + ChronoDuration::seconds(self.config.ttl_seconds),
        };
        with_deadline(self.config.deadline, self.store.save(&session)).await?;
        Ok(IssuedSession { session, token })
    }

    /// Build a `HttpOnly` cookie for the session token.
    ///
    /// # Errors
    /// Returns an error if the token contains bytes invalid in a header.
    pub fn cookie(&self, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let ttl_seconds = self.config.ttl_seconds;
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Cookie that makes the client drop its session immediately.
    #[must_use]
    pub fn expired_cookie(&self) -> HeaderValue {
        let cookie = if self.config.cookie_secure {
            format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure")
        } else {
            format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
        };
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static("Max-Age=0"))
    }
}

/// Middleware: attach the request's [`CurrentSession`].
pub async fn load(
    State(sessions): State<SessionManager>,
    mut request: Request,
    next: Next,
) -> Response {
    match sessions.resolve(request.headers()).await {
        Ok(session) => {
            request.extensions_mut().insert(CurrentSession(session));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Hash a session token so raw values never reach the store.
#[must_use]
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use anyhow::{Context, Result};
    use uuid::Uuid;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemorySessionStore::new()), SessionConfig::default())
    }

    fn cookie_headers(token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE_NAME}={token}"))?,
        );
        Ok(headers)
    }

    fn alice() -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role: Role::Administrator,
        }
    }

    #[tokio::test]
    async fn opening_a_slot_purges_abandoned_expired_ones() -> Result<()> {
        let store = Arc::new(MemorySessionStore::new());
        let short_lived = SessionManager::new(
            store.clone(),
            SessionConfig::default().with_ttl_seconds(0),
        );
        for _ in 0..1000 {
            short_lived.open().await?;
        }

        let sessions = SessionManager::new(store.clone(), SessionConfig::default());
        let issued = sessions.open().await?;

        let slots = store.slots.read().await;
        assert_eq!(slots.len(), 1);
        assert!(slots.contains_key(&issued.session.id));
        Ok(())
    }

    #[tokio::test]
    async fn purge_keeps_live_slots() -> Result<()> {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let live = Session {
            id: "live".to_string(),
            identity: Some(alice()),
            csrf_secret: "s1".to_string(),
            expires_at: now + ChronoDuration::seconds(60),
        };
        let stale = Session {
            id: "stale".to_string(),
            identity: None,
            csrf_secret: "s2".to_string(),
            expires_at: now - ChronoDuration::seconds(1),
        };
        store.save(&live).await?;
        store.save(&stale).await?;

        assert_eq!(store.purge_expired(now).await?, 1);
        assert_eq!(store.load("live").await?, Some(live));
        assert_eq!(store.load("stale").await?, None);
        Ok(())
    }

    #[test]
    fn extract_session_token_finds_named_cookie() -> Result<()> {
        let headers = cookie_headers("abc")?;
        assert_eq!(extract_session_token(&headers), Some("abc".to_string()));
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
        Ok(())
    }

    #[test]
    fn extract_session_token_ignores_cleared_cookie() -> Result<()> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}="))?,
        );
        assert_eq!(extract_session_token(&headers), None);
        Ok(())
    }

    #[test]
    fn hash_session_token_is_stable() {
        assert_eq!(hash_session_token("token"), hash_session_token("token"));
        assert_ne!(hash_session_token("token"), hash_session_token("other"));
    }

    #[tokio::test]
    async fn anonymous_slot_has_no_identity() -> Result<()> {
        let sessions = manager();
        let issued = sessions.open().await?;
        let resolved = sessions
            .resolve(&cookie_headers(&issued.token)?)
            .await?
            .context("slot should resolve")?;
        assert_eq!(resolved, issued.session);
        assert!(matches!(
            SessionManager::current(Some(&resolved)),
            Err(AccessError::Unauthenticated)
        ));
        assert!(matches!(
            SessionManager::current(None),
            Err(AccessError::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn establish_replaces_the_prior_slot() -> Result<()> {
        let sessions = manager();
        let anonymous = sessions.open().await?;
        let identity = alice();
        let issued = sessions
            .establish(Some(&anonymous.session), identity)
            .await?;

        assert_ne!(issued.session.id, anonymous.session.id);
        assert!(sessions
            .resolve(&cookie_headers(&anonymous.token)?)
            .await?
            .is_none());
        let resolved = sessions.resolve(&cookie_headers(&issued.token)?).await?;
        assert_eq!(SessionManager::current(resolved.as_ref())?, identity);
        Ok(())
    }

    #[tokio::test]
    async fn terminate_returns_client_to_anonymous() -> Result<()> {
        let sessions = manager();
        let issued = sessions.establish(None, alice()).await?;
        sessions.terminate(Some(&issued.session)).await?;

        let resolved = sessions.resolve(&cookie_headers(&issued.token)?).await?;
        assert!(resolved.is_none());
        assert!(matches!(
            SessionManager::current(resolved.as_ref()),
            Err(AccessError::Unauthenticated)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_slots_do_not_resolve() -> Result<()> {
        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionConfig::default().with_ttl_seconds(0),
        );
        let issued = sessions.establish(None, alice()).await?;
        assert!(sessions
            .resolve(&cookie_headers(&issued.token)?)
            .await?
            .is_none());
        Ok(())
    }

    #[test]
    fn cookies_carry_ttl_and_secure_flag() -> Result<()> {
        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            SessionConfig::default()
                .with_ttl_seconds(120)
                .with_cookie_secure(true),
        );
        let cookie = sessions.cookie("tok")?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with(&format!("{SESSION_COOKIE_NAME}=tok;")));
        assert!(cookie.contains("Max-Age=120"));
        assert!(cookie.ends_with("; Secure"));

        let expired = sessions.expired_cookie();
        assert!(expired.to_str()?.contains("Max-Age=0"));
        Ok(())
    }
}
