use crate::{
    access::{CsrfGuard, MemorySessionStore, SessionConfig, SessionManager, SessionStore},
    riskassess::{self, AppState},
    storage::{postgres::PgSessionStore, MemoryStorage, PgStorage, Storage},
};
use anyhow::Result;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub csrf_secret: SecretString,
    pub session_ttl: i64,
    pub cookie_secure: bool,
    pub storage_timeout: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (storage, store): (Arc<dyn Storage>, Arc<dyn SessionStore>) = match &args.dsn {
        Some(dsn) => {
            let pg = PgStorage::connect(dsn).await?;
            let sessions = PgSessionStore::new(pg.pool().clone());
            (Arc::new(pg), Arc::new(sessions))
        }
        None => {
            warn!("No DSN configured, records are kept in memory and lost on exit");
            (
                Arc::new(MemoryStorage::new()),
                Arc::new(MemorySessionStore::new()),
            )
        }
    };

    let sessions = SessionManager::new(
        store,
        SessionConfig::default()
            .with_ttl_seconds(args.session_ttl)
            .with_cookie_secure(args.cookie_secure)
            .with_deadline(args.storage_timeout),
    );

    let state = AppState::new(
        storage,
        sessions,
        CsrfGuard::new(args.csrf_secret),
        args.storage_timeout,
    );

    riskassess::new(args.port, state).await
}

fn log_startup_args(args: &Args) {
    let dsn = args
        .dsn
        .as_deref()
        .map_or_else(|| "memory".to_string(), redact_dsn);
    info!(
        "Startup: port={} storage={} session_ttl={}s cookie_secure={} storage_timeout={}ms",
        args.port,
        dsn,
        args.session_ttl,
        args.cookie_secure,
        args.storage_timeout.as_millis()
    );
}

/// Hide the password of a connection string before it reaches the logs.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<redacted>".to_string();
            }
            url.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}
