//! Shared harness for router-level tests.
//!
//! [`TestClient`] drives the axum `Router` through `oneshot`, keeping the
//! session cookie and the latest CSRF token the way a browser client would.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes},
    http::{
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        HeaderMap, Method, Request, StatusCode,
    },
    Router,
};
use riskassess::{
    access::{CsrfGuard, MemorySessionStore, SessionConfig, SessionManager},
    cli::telemetry::json_layer,
    riskassess::{app, AppState},
    storage::{Asset, MemoryStorage, Scope, Storage, StorageError, User},
};
use secrecy::SecretString;
use serde_json::Value;
use std::{
    io::Write,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tower::ServiceExt;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{layer::SubscriberExt, Registry};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "riskassess_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// JSON log lines emitted on this thread while the guard is alive.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn start() -> (DefaultGuard, Self) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = Registry::default().with(json_layer(move || writer.clone()));
        (tracing::subscriber::set_default(subscriber), capture)
    }

    pub fn events(&self) -> Result<Vec<Value>> {
        let bytes = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("log buffer poisoned"))?
            .clone();
        String::from_utf8(bytes)?
            .lines()
            .map(|line| serde_json::from_str(line).context("log line is not JSON"))
            .collect()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut bytes) = self.0.lock() {
            bytes.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Build the application over `storage` with an in-memory session store.
pub fn build_app(storage: Arc<dyn Storage>, deadline: Duration) -> Router {
    let sessions = SessionManager::new(
        Arc::new(MemorySessionStore::new()),
        SessionConfig::default().with_deadline(deadline),
    );
    let csrf = CsrfGuard::new(SecretString::from("test-csrf-secret".to_string()));
    app(AppState::new(storage, sessions, csrf, deadline))
}

pub fn memory_app() -> (Router, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (build_app(storage.clone(), Duration::from_secs(2)), storage)
}

#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).context("response body is not JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

/// A browser-like client: one cookie, one CSRF token.
#[derive(Clone)]
pub struct TestClient {
    app: Router,
    pub cookie: Option<String>,
    pub csrf: Option<String>,
}

impl TestClient {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            cookie: None,
            csrf: None,
        }
    }

    pub async fn send(&mut self, mut request: Request<Body>) -> Result<TestResponse> {
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(COOKIE, format!("{SESSION_COOKIE}={cookie}").parse()?);
        }

        let response = self.app.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await?;

        for value in headers.get_all(SET_COOKIE) {
            let value = value.to_str()?;
            if let Some(rest) = value.strip_prefix(&format!("{SESSION_COOKIE}=")) {
                let token = rest.split(';').next().unwrap_or_default();
                self.cookie = (!token.is_empty()).then(|| token.to_string());
            }
        }
        if let Some(token) = headers.get(CSRF_HEADER) {
            self.csrf = Some(token.to_str()?.to_string());
        }

        Ok(TestResponse {
            status,
            headers,
            body,
        })
    }

    fn with_csrf(&self, builder: axum::http::request::Builder) -> axum::http::request::Builder {
        match &self.csrf {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    pub async fn get(&mut self, path: &str) -> Result<TestResponse> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_json(&mut self, path: &str, body: &Value) -> Result<TestResponse> {
        let request = self
            .with_csrf(Request::builder().method(Method::POST).uri(path))
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.send(request).await
    }

    /// POST a JSON body without any CSRF token.
    pub async fn post_json_bare(&mut self, path: &str, body: &Value) -> Result<TestResponse> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body)?))?;
        self.send(request).await
    }

    pub async fn post_form(&mut self, path: &str, pairs: &[(&str, &str)]) -> Result<TestResponse> {
        let request = self
            .with_csrf(Request::builder().method(Method::POST).uri(path))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encode_form(pairs)))?;
        self.send(request).await
    }

    /// POST a form with no header token; callers put `_csrf` in `pairs` if they want one.
    pub async fn post_form_bare(&mut self, path: &str, pairs: &[(&str, &str)]) -> Result<TestResponse> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encode_form(pairs)))?;
        self.send(request).await
    }

    /// Fetch the login page, picking up a session slot and its CSRF token.
    pub async fn prime(&mut self) -> Result<()> {
        let response = self.get("/api/login").await?;
        anyhow::ensure!(response.status == StatusCode::OK, "login page failed");
        Ok(())
    }

    pub async fn register(&mut self, account: &str, passwd: &str) -> Result<TestResponse> {
        if self.csrf.is_none() {
            self.prime().await?;
        }
        self.post_form("/api/register", &[("account", account), ("passwd", passwd)])
            .await
    }

    pub async fn login(&mut self, account: &str, passwd: &str) -> Result<TestResponse> {
        if self.csrf.is_none() {
            self.prime().await?;
        }
        self.post_form("/api/login", &[("account", account), ("passwd", passwd)])
            .await
    }

    /// Register then log in, asserting both succeed.
    pub async fn sign_up(&mut self, account: &str, passwd: &str) -> Result<()> {
        let registered = self.register(account, passwd).await?;
        anyhow::ensure!(
            registered.status == StatusCode::FOUND,
            "register {account}: {}",
            registered.status
        );
        let logged_in = self.login(account, passwd).await?;
        anyhow::ensure!(
            logged_in.status == StatusCode::OK,
            "login {account}: {}",
            logged_in.status
        );
        Ok(())
    }
}

pub fn encode_form(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Storage that fails the test if anything reaches it.
pub struct PanicStorage;

#[async_trait]
impl Storage for PanicStorage {
    async fn find_user_by_id(&self, _: Uuid) -> Result<User, StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_user_by_account(&self, _: &str) -> Result<User, StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_user_by_account_and_password_hash(
        &self,
        _: &str,
        _: &str,
    ) -> Result<User, StorageError> {
        panic!("storage must not be reached")
    }
    async fn count_users(&self) -> Result<u64, StorageError> {
        panic!("storage must not be reached")
    }
    async fn insert_user(&self, _: &User) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn replace_user(&self, _: &User) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_scope_by_id(&self, _: Uuid) -> Result<Scope, StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_scopes_by_ids(&self, _: &[Uuid]) -> Result<Vec<Scope>, StorageError> {
        panic!("storage must not be reached")
    }
    async fn list_scopes(&self) -> Result<Vec<Scope>, StorageError> {
        panic!("storage must not be reached")
    }
    async fn insert_scope(&self, _: &Scope) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn replace_scope(&self, _: &Scope) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_asset_by_id(&self, _: Uuid) -> Result<Asset, StorageError> {
        panic!("storage must not be reached")
    }
    async fn find_assets_by_scope(&self, _: Uuid) -> Result<Vec<Asset>, StorageError> {
        panic!("storage must not be reached")
    }
    async fn list_assets(&self, _: u64, _: u64) -> Result<Vec<Asset>, StorageError> {
        panic!("storage must not be reached")
    }
    async fn insert_asset(&self, _: &Asset) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn replace_asset(&self, _: &Asset) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
    async fn delete_asset(&self, _: Uuid) -> Result<(), StorageError> {
        panic!("storage must not be reached")
    }
}

/// In-memory storage whose user-by-id lookups can be made to hang.
#[derive(Default)]
pub struct StallingStorage {
    inner: MemoryStorage,
    stall_user_lookups: AtomicBool,
}

impl StallingStorage {
    pub fn stall_user_lookups(&self, stall: bool) {
        self.stall_user_lookups.store(stall, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for StallingStorage {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, StorageError> {
        if self.stall_user_lookups.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.find_user_by_id(id).await
    }
    async fn find_user_by_account(&self, account: &str) -> Result<User, StorageError> {
        self.inner.find_user_by_account(account).await
    }
    async fn find_user_by_account_and_password_hash(
        &self,
        account: &str,
        password_hash: &str,
    ) -> Result<User, StorageError> {
        self.inner
            .find_user_by_account_and_password_hash(account, password_hash)
            .await
    }
    async fn count_users(&self) -> Result<u64, StorageError> {
        self.inner.count_users().await
    }
    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        self.inner.insert_user(user).await
    }
    async fn replace_user(&self, user: &User) -> Result<(), StorageError> {
        self.inner.replace_user(user).await
    }
    async fn find_scope_by_id(&self, id: Uuid) -> Result<Scope, StorageError> {
        self.inner.find_scope_by_id(id).await
    }
    async fn find_scopes_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scope>, StorageError> {
        self.inner.find_scopes_by_ids(ids).await
    }
    async fn list_scopes(&self) -> Result<Vec<Scope>, StorageError> {
        self.inner.list_scopes().await
    }
    async fn insert_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        self.inner.insert_scope(scope).await
    }
    async fn replace_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        self.inner.replace_scope(scope).await
    }
    async fn find_asset_by_id(&self, id: Uuid) -> Result<Asset, StorageError> {
        self.inner.find_asset_by_id(id).await
    }
    async fn find_assets_by_scope(&self, scope: Uuid) -> Result<Vec<Asset>, StorageError> {
        self.inner.find_assets_by_scope(scope).await
    }
    async fn list_assets(&self, offset: u64, limit: u64) -> Result<Vec<Asset>, StorageError> {
        self.inner.list_assets(offset, limit).await
    }
    async fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        self.inner.insert_asset(asset).await
    }
    async fn replace_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        self.inner.replace_asset(asset).await
    }
    async fn delete_asset(&self, id: Uuid) -> Result<(), StorageError> {
        self.inner.delete_asset(id).await
    }
}
