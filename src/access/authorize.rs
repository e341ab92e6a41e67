//! Gate composition and per-resource authorization.
//!
//! Endpoint groups declare an [`EndpointClass`]; its ordered [`Gate`] list is
//! evaluated by a [`GuardChain`] before the handler runs. Scope membership is
//! resource-specific, so handlers call the [`Authorizer`] once they know which
//! scope the target belongs to.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{sync::Arc, time::Duration};
use tracing::warn;
use uuid::Uuid;

use super::{
    directory::Directory,
    session::{CurrentSession, SessionManager},
    AccessError, Identity, Session,
};
use crate::storage::{with_deadline, Asset, Storage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Authenticated,
    Administrator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointClass {
    Public,
    Private,
    Privileged,
}

impl EndpointClass {
    #[must_use]
    pub const fn gates(self) -> &'static [Gate] {
        match self {
            Self::Public => &[],
            Self::Private => &[Gate::Authenticated],
            Self::Privileged => &[Gate::Authenticated, Gate::Administrator],
        }
    }
}

/// Role gate.
///
/// # Errors
/// Returns `AccessError::Forbidden` unless the identity is an administrator.
pub fn require_administrator(identity: &Identity) -> Result<(), AccessError> {
    if identity.is_administrator() {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GuardChain {
    gates: &'static [Gate],
}

impl GuardChain {
    #[must_use]
    pub const fn for_class(class: EndpointClass) -> Self {
        Self {
            gates: class.gates(),
        }
    }

    #[must_use]
    pub const fn gates(&self) -> &'static [Gate] {
        self.gates
    }

    /// Evaluate the gates in order, stopping at the first failure.
    ///
    /// Returns the caller's identity when any gate needed one.
    ///
    /// # Errors
    /// `Unauthenticated` when there is no identity, `Forbidden` when a role gate fails.
    pub fn check(&self, session: Option<&Session>) -> Result<Option<Identity>, AccessError> {
        let mut identity = None;
        for gate in self.gates {
            match gate {
                Gate::Authenticated => {
                    identity = Some(SessionManager::current(session)?);
                }
                Gate::Administrator => {
                    let current = match identity {
                        Some(current) => current,
                        None => SessionManager::current(session)?,
                    };
                    require_administrator(&current)?;
                    identity = Some(current);
                }
            }
        }
        Ok(identity)
    }
}

/// Middleware: run the chain and hand the verified [`Identity`] to the handler.
pub async fn enforce(State(chain): State<GuardChain>, mut request: Request, next: Next) -> Response {
    let session = request
        .extensions()
        .get::<CurrentSession>()
        .and_then(|current| current.get().cloned());

    match chain.check(session.as_ref()) {
        Ok(identity) => {
            if let Some(identity) = identity {
                request.extensions_mut().insert(identity);
            }
            next.run(request).await
        }
        Err(err) => {
            if matches!(err, AccessError::Forbidden) {
                warn!(path = %request.uri().path(), "Role gate denied request");
            }
            err.into_response()
        }
    }
}

/// Scope-membership decisions for assets.
#[derive(Clone)]
pub struct Authorizer {
    directory: Directory,
    storage: Arc<dyn Storage>,
    deadline: Duration,
}

impl Authorizer {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, deadline: Duration) -> Self {
        Self {
            directory: Directory::new(storage.clone(), deadline),
            storage,
            deadline,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Scope-membership gate.
    ///
    /// # Errors
    /// `Forbidden` when the user is not in the scope, `Internal` when the
    /// directory cannot answer.
    pub async fn require_scope(&self, identity: &Identity, scope_id: Uuid) -> Result<(), AccessError> {
        if self.directory.is_member(identity.id, scope_id).await? {
            Ok(())
        } else {
            warn!(user = %identity.id, scope = %scope_id, "Scope gate denied request");
            Err(AccessError::Forbidden)
        }
    }

    /// Fetch an existing asset and check the caller against its stored scope.
    ///
    /// # Errors
    /// `NotFound` when the asset does not exist, then `Forbidden` when the
    /// caller is outside its scope.
    pub async fn asset_for(&self, identity: &Identity, asset_id: Uuid) -> Result<Asset, AccessError> {
        let asset = with_deadline(self.deadline, self.storage.find_asset_by_id(asset_id))
            .await
            .map_err(AccessError::from_lookup)?;
        self.require_scope(identity, asset.scope).await?;
        Ok(asset)
    }

    /// Admit creation of an asset in `scope_id`, the scope the client asked for.
    ///
    /// # Errors
    /// `NotFound` when the scope does not exist, `Forbidden` when the caller is
    /// not a member.
    pub async fn admit_new_asset(&self, identity: &Identity, scope_id: Uuid) -> Result<(), AccessError> {
        if !self.directory.exists(scope_id).await? {
            return Err(AccessError::NotFound);
        }
        self.require_scope(identity, scope_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::storage::{MemoryStorage, Scope, User};
    use anyhow::{Context, Result};
    use chrono::Utc;

    fn session(identity: Option<Identity>) -> Session {
        Session {
            id: "slot".to_string(),
            identity,
            csrf_secret: "salt".to_string(),
            expires_at: Utc::now(),
        }
    }

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn public_chain_admits_everyone() -> Result<()> {
        let chain = GuardChain::for_class(EndpointClass::Public);
        assert_eq!(chain.check(None)?, None);
        Ok(())
    }

    #[test]
    fn private_chain_requires_identity() -> Result<()> {
        let chain = GuardChain::for_class(EndpointClass::Private);
        assert!(matches!(chain.check(None), Err(AccessError::Unauthenticated)));
        assert!(matches!(
            chain.check(Some(&session(None))),
            Err(AccessError::Unauthenticated)
        ));
        let normal = identity(Role::Normal);
        assert_eq!(chain.check(Some(&session(Some(normal))))?, Some(normal));
        Ok(())
    }

    #[test]
    fn privileged_chain_separates_unauthenticated_from_forbidden() -> Result<()> {
        let chain = GuardChain::for_class(EndpointClass::Privileged);
        assert_eq!(chain.gates(), &[Gate::Authenticated, Gate::Administrator]);
        assert!(matches!(chain.check(None), Err(AccessError::Unauthenticated)));
        assert!(matches!(
            chain.check(Some(&session(Some(identity(Role::Normal))))),
            Err(AccessError::Forbidden)
        ));
        let admin = identity(Role::Administrator);
        let checked = chain
            .check(Some(&session(Some(admin))))?
            .context("identity expected")?;
        assert_eq!(checked, admin);
        Ok(())
    }

    struct Fixture {
        storage: Arc<MemoryStorage>,
        authorizer: Authorizer,
        member: User,
        scope: Scope,
    }

    async fn fixture() -> Result<Fixture> {
        let storage = Arc::new(MemoryStorage::new());
        let scope = Scope::new("Finance".to_string());
        storage.insert_scope(&scope).await?;
        let mut member = User::new("alice".to_string(), "h".to_string(), Role::Administrator);
        member.scopes.push(scope.id);
        storage.insert_user(&member).await?;
        let authorizer = Authorizer::new(storage.clone(), Duration::from_secs(1));
        Ok(Fixture {
            storage,
            authorizer,
            member,
            scope,
        })
    }

    fn identity_of(user: &User) -> Identity {
        Identity {
            id: user.id,
            role: user.role,
        }
    }

    #[tokio::test]
    async fn admit_new_asset_checks_existence_then_membership() -> Result<()> {
        let fx = fixture().await?;
        let outsider = User::new("bob".to_string(), "h".to_string(), Role::Normal);
        fx.storage.insert_user(&outsider).await?;

        fx.authorizer
            .admit_new_asset(&identity_of(&fx.member), fx.scope.id)
            .await?;
        assert!(matches!(
            fx.authorizer
                .admit_new_asset(&identity_of(&fx.member), Uuid::new_v4())
                .await,
            Err(AccessError::NotFound)
        ));
        assert!(matches!(
            fx.authorizer
                .admit_new_asset(&identity_of(&outsider), fx.scope.id)
                .await,
            Err(AccessError::Forbidden)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn asset_for_uses_the_stored_scope() -> Result<()> {
        let fx = fixture().await?;
        let asset = Asset::new(fx.scope.id);
        fx.storage.insert_asset(&asset).await?;

        let outsider = User::new("bob".to_string(), "h".to_string(), Role::Administrator);
        fx.storage.insert_user(&outsider).await?;

        let fetched = fx
            .authorizer
            .asset_for(&identity_of(&fx.member), asset.id)
            .await?;
        assert_eq!(fetched.id, asset.id);
        assert!(matches!(
            fx.authorizer
                .asset_for(&identity_of(&outsider), asset.id)
                .await,
            Err(AccessError::Forbidden)
        ));
        assert!(matches!(
            fx.authorizer
                .asset_for(&identity_of(&fx.member), Uuid::new_v4())
                .await,
            Err(AccessError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn scope_reassignment_is_seen_on_the_next_check() -> Result<()> {
        let fx = fixture().await?;
        let mut bob = User::new("bob".to_string(), "h".to_string(), Role::Normal);
        fx.storage.insert_user(&bob).await?;
        let bob_identity = identity_of(&bob);

        assert!(fx
            .authorizer
            .require_scope(&bob_identity, fx.scope.id)
            .await
            .is_err());
        bob.scopes = vec![fx.scope.id];
        fx.storage.replace_user(&bob).await?;
        fx.authorizer
            .require_scope(&bob_identity, fx.scope.id)
            .await?;
        Ok(())
    }
}
