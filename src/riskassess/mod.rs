use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;

use crate::{
    access::{Authorizer, CredentialVerifier, CsrfGuard, SessionManager},
    storage::{with_deadline, Storage, StorageError},
};

pub mod handlers;
pub mod openapi;
pub mod routes;

pub use routes::app;

/// Everything a handler needs, shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionManager,
    pub csrf: CsrfGuard,
    pub authorizer: Authorizer,
    pub verifier: CredentialVerifier,
    pub deadline: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        sessions: SessionManager,
        csrf: CsrfGuard,
        deadline: Duration,
    ) -> Self {
        Self {
            authorizer: Authorizer::new(storage.clone(), deadline),
            verifier: CredentialVerifier::new(storage.clone(), deadline),
            storage,
            sessions,
            csrf,
            deadline,
        }
    }

    /// Run a storage call under the configured deadline.
    ///
    /// # Errors
    /// Returns the call's error, or `StorageError::Timeout`.
    pub async fn call<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        with_deadline(self.deadline, call).await
    }
}

/// Serve the API until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let app = app(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let method = request.method().as_str();
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", method, path, request_id)
}
