use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::time::Duration;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches.get_one::<String>("dsn").cloned();

    let csrf_secret = matches
        .get_one::<String>("csrf-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --csrf-secret")?;

    let session_ttl = matches
        .get_one::<i64>("session-ttl")
        .copied()
        .unwrap_or(3600);
    let cookie_secure = matches.get_flag("cookie-secure");
    let storage_timeout = Duration::from_millis(
        matches
            .get_one::<u64>("storage-timeout")
            .copied()
            .unwrap_or(5000),
    );

    Ok(Action::Server(Args {
        port,
        dsn,
        csrf_secret,
        session_ttl,
        cookie_secure,
        storage_timeout,
    }))
}
