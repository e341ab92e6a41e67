//! Document storage for users, scopes and assets.
//!
//! The access-control layer only talks to storage through the [`Storage`]
//! trait: single-entity lookups by key, filtered listings and replace-by-id
//! writes. Two adapters ship with the crate:
//!
//! - [`MemoryStorage`] keeps everything in process and is used when no DSN is
//!   configured (and throughout the tests).
//! - [`PgStorage`] persists to Postgres through a `sqlx` pool.
//!
//! Lookups that find nothing return [`StorageError::NotFound`], which callers
//! must keep apart from backend failures: the first is a client mistake (`400`),
//! the second an operator problem (`500`).

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use std::{future::Future, time::Duration};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStorage;
pub use models::{Asset, AssetValue, Risk, Scope, User};
pub use postgres::PgStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,
    #[error("record conflicts with an existing one")]
    Conflict,
    #[error("storage call exceeded its deadline")]
    Timeout,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

impl StorageError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, StorageError>;
    async fn find_user_by_account(&self, account: &str) -> Result<User, StorageError>;
    async fn find_user_by_account_and_password_hash(
        &self,
        account: &str,
        password_hash: &str,
    ) -> Result<User, StorageError>;
    async fn count_users(&self) -> Result<u64, StorageError>;
    async fn insert_user(&self, user: &User) -> Result<(), StorageError>;
    async fn replace_user(&self, user: &User) -> Result<(), StorageError>;

    async fn find_scope_by_id(&self, id: Uuid) -> Result<Scope, StorageError>;
    async fn find_scopes_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scope>, StorageError>;
    async fn list_scopes(&self) -> Result<Vec<Scope>, StorageError>;
    async fn insert_scope(&self, scope: &Scope) -> Result<(), StorageError>;
    async fn replace_scope(&self, scope: &Scope) -> Result<(), StorageError>;

    async fn find_asset_by_id(&self, id: Uuid) -> Result<Asset, StorageError>;
    async fn find_assets_by_scope(&self, scope: Uuid) -> Result<Vec<Asset>, StorageError>;
    /// Page through all assets in insertion order. A `limit` of zero means no limit.
    async fn list_assets(&self, offset: u64, limit: u64) -> Result<Vec<Asset>, StorageError>;
    async fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError>;
    async fn replace_asset(&self, asset: &Asset) -> Result<(), StorageError>;
    async fn delete_asset(&self, id: Uuid) -> Result<(), StorageError>;
}

/// Run a storage call under a deadline; an elapsed deadline becomes [`StorageError::Timeout`].
///
/// # Errors
/// Returns the call's own error, or `Timeout` when it did not finish in time.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout),
    }
}
