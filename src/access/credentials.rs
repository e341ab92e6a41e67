//! Account + password verification.

use sha2::{Digest, Sha256};
use std::{sync::Arc, time::Duration};
use tracing::{instrument, warn};

use super::{AccessError, Identity};
use crate::storage::{with_deadline, Storage};

/// One-way, fixed-size digest of a password: SHA-256, lowercase hex.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Trim both inputs; `None` when either ends up empty.
#[must_use]
pub fn normalize_credentials<'a>(account: &'a str, password: &'a str) -> Option<(&'a str, &'a str)> {
    let account = account.trim();
    let password = password.trim();
    if account.is_empty() || password.is_empty() {
        None
    } else {
        Some((account, password))
    }
}

#[derive(Clone)]
pub struct CredentialVerifier {
    storage: Arc<dyn Storage>,
    deadline: Duration,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, deadline: Duration) -> Self {
        Self { storage, deadline }
    }

    /// Resolve credentials to an identity.
    ///
    /// Unknown accounts, wrong passwords and storage failures all come back as
    /// the same `InvalidCredentials`.
    ///
    /// # Errors
    /// Returns `AccessError::InvalidCredentials` on any failure.
    #[instrument(skip(self, password))]
    pub async fn verify(&self, account: &str, password: &str) -> Result<Identity, AccessError> {
        let Some((account, password)) = normalize_credentials(account, password) else {
            return Err(AccessError::InvalidCredentials);
        };

        let password_hash = hash_password(password);
        let lookup = self
            .storage
            .find_user_by_account_and_password_hash(account, &password_hash);
        match with_deadline(self.deadline, lookup).await {
            Ok(user) => Ok(Identity {
                id: user.id,
                role: user.role,
            }),
            Err(err) => {
                if !err.is_not_found() {
                    warn!("Credential lookup failed: {err}");
                }
                Err(AccessError::InvalidCredentials)
            }
        }
    }
}
