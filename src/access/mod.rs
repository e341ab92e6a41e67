//! Access control for the risk-assessment API.
//!
//! A request passes, in order:
//!
//! 1. [`session::load`] resolves the session cookie into a [`CurrentSession`].
//! 2. [`csrf::enforce`] rejects state-changing verbs without a valid token.
//! 3. [`authorize::enforce`] runs the endpoint group's [`GuardChain`]
//!    (authentication, then role).
//! 4. The handler asks the [`Authorizer`] about the target resource's scope
//!    before it reads or writes anything.

pub mod authorize;
pub mod credentials;
pub mod csrf;
pub mod directory;
pub mod error;
pub mod identity;
pub mod session;

pub use authorize::{require_administrator, Authorizer, EndpointClass, Gate, GuardChain};
pub use credentials::{hash_password, normalize_credentials, CredentialVerifier};
pub use csrf::{CsrfGuard, CSRF_HEADER};
pub use directory::Directory;
pub use error::AccessError;
pub use identity::{Identity, Role};
pub use session::{
    CurrentSession, IssuedSession, MemorySessionStore, Session, SessionConfig, SessionManager,
    SessionStore,
};
