//! Who belongs to which scope.
//!
//! Every answer is read from storage at call time. Scope edits made by an
//! administrator are visible on the very next check, while the role stays as it
//! was cached in the session at login.

use std::{sync::Arc, time::Duration};
use uuid::Uuid;

use super::AccessError;
use crate::storage::{with_deadline, Storage, StorageError};

#[derive(Clone)]
pub struct Directory {
    storage: Arc<dyn Storage>,
    deadline: Duration,
}

impl Directory {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, deadline: Duration) -> Self {
        Self { storage, deadline }
    }

    /// The user's scope ids as currently stored. An unknown user has none.
    ///
    /// # Errors
    /// Returns `AccessError::Internal` on storage failure or timeout.
    pub async fn scopes_of(&self, user_id: Uuid) -> Result<Vec<Uuid>, AccessError> {
        match with_deadline(self.deadline, self.storage.find_user_by_id(user_id)).await {
            Ok(user) => Ok(user.scopes),
            Err(StorageError::NotFound) => Ok(Vec::new()),
            Err(err) => Err(AccessError::Internal(err)),
        }
    }

    /// # Errors
    /// Returns `AccessError::Internal` on storage failure or timeout.
    pub async fn is_member(&self, user_id: Uuid, scope_id: Uuid) -> Result<bool, AccessError> {
        Ok(self.scopes_of(user_id).await?.contains(&scope_id))
    }

    /// # Errors
    /// Returns `AccessError::Internal` on storage failure or timeout.
    pub async fn exists(&self, scope_id: Uuid) -> Result<bool, AccessError> {
        match with_deadline(self.deadline, self.storage.find_scope_by_id(scope_id)).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(AccessError::Internal(err)),
        }
    }
}
