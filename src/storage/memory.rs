//! In-process storage used when no database is configured.

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Asset, Scope, Storage, StorageError, User};

#[derive(Debug, Default)]
struct Collections {
    users: Vec<User>,
    scopes: Vec<Scope>,
    assets: Vec<Asset>,
}

/// Insertion-ordered collections behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Collections>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn replace_by_id<T>(
    items: &mut [T],
    id: Uuid,
    key: impl Fn(&T) -> Uuid,
    value: T,
) -> Result<(), StorageError> {
    let slot = items
        .iter_mut()
        .find(|item| key(item) == id)
        .ok_or(StorageError::NotFound)?;
    *slot = value;
    Ok(())
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_user_by_id(&self, id: Uuid) -> Result<User, StorageError> {
        let inner = self.inner.read().await;
        inner
            .users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_user_by_account(&self, account: &str) -> Result<User, StorageError> {
        let inner = self.inner.read().await;
        inner
            .users
            .iter()
            .find(|user| user.account == account)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_user_by_account_and_password_hash(
        &self,
        account: &str,
        password_hash: &str,
    ) -> Result<User, StorageError> {
        let inner = self.inner.read().await;
        inner
            .users
            .iter()
            .find(|user| user.account == account && user.password_hash == password_hash)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn count_users(&self) -> Result<u64, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.users.len() as u64)
    }

    async fn insert_user(&self, user: &User) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner
            .users
            .iter()
            .any(|existing| existing.id == user.id || existing.account == user.account)
        {
            return Err(StorageError::Conflict);
        }
        inner.users.push(user.clone());
        Ok(())
    }

    async fn replace_user(&self, user: &User) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        replace_by_id(&mut inner.users, user.id, |u| u.id, user.clone())
    }

    async fn find_scope_by_id(&self, id: Uuid) -> Result<Scope, StorageError> {
        let inner = self.inner.read().await;
        inner
            .scopes
            .iter()
            .find(|scope| scope.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_scopes_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Scope>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .scopes
            .iter()
            .filter(|scope| ids.contains(&scope.id))
            .cloned()
            .collect())
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner.scopes.clone())
    }

    async fn insert_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.scopes.iter().any(|existing| existing.id == scope.id) {
            return Err(StorageError::Conflict);
        }
        inner.scopes.push(scope.clone());
        Ok(())
    }

    async fn replace_scope(&self, scope: &Scope) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        replace_by_id(&mut inner.scopes, scope.id, |s| s.id, scope.clone())
    }

    async fn find_asset_by_id(&self, id: Uuid) -> Result<Asset, StorageError> {
        let inner = self.inner.read().await;
        inner
            .assets
            .iter()
            .find(|asset| asset.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn find_assets_by_scope(&self, scope: Uuid) -> Result<Vec<Asset>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .assets
            .iter()
            .filter(|asset| asset.scope == scope)
            .cloned()
            .collect())
    }

    async fn list_assets(&self, offset: u64, limit: u64) -> Result<Vec<Asset>, StorageError> {
        let inner = self.inner.read().await;
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = match limit {
            0 => usize::MAX,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };
        Ok(inner.assets.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.assets.iter().any(|existing| existing.id == asset.id) {
            return Err(StorageError::Conflict);
        }
        inner.assets.push(asset.clone());
        Ok(())
    }

    async fn replace_asset(&self, asset: &Asset) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        replace_by_id(&mut inner.assets, asset.id, |a| a.id, asset.clone())
    }

    async fn delete_asset(&self, id: Uuid) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let before = inner.assets.len();
        inner.assets.retain(|asset| asset.id != id);
        if inner.assets.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
