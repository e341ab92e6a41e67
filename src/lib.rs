//! # Riskassess
//!
//! Record keeping for organizational risk assessments. Assets (with their
//! confidentiality/integrity/availability ratings and risk entries) live in
//! administrative **scopes**, and every read or write of an asset is authorized
//! through membership in the asset's own scope.
//!
//! ## Access model
//!
//! - The first account ever registered is an administrator, every later one is
//!   a normal user.
//! - Administrators manage scopes and assign users to them.
//! - Sessions are cookie slots holding the caller's identity. The role is fixed
//!   at login, scope membership is read from storage on every check.
//! - Every state-changing request carries a session-bound CSRF token.
//!
//! See [`access`] for the request pipeline and [`storage`] for the adapters.

pub mod access;
pub mod cli;
pub mod riskassess;
pub mod storage;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
