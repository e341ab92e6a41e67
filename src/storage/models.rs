//! Stored entities for users, scopes and assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::access::Role;

/// A registered account. The password is only ever held as a SHA-256 hex digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub create_time: DateTime<Utc>,
    pub account: String,
    pub password_hash: String,
    pub role: Role,
    pub scopes: Vec<Uuid>,
}

impl User {
    #[must_use]
    pub fn new(account: String, password_hash: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            create_time: Utc::now(),
            account,
            password_hash,
            role,
            scopes: Vec::new(),
        }
    }
}

/// An administrative partition of assets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub id: Uuid,
    pub create_time: DateTime<Utc>,
    pub name: String,
}

impl Scope {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            create_time: Utc::now(),
            name,
        }
    }
}

/// Confidentiality, integrity and availability ratings of an asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssetValue {
    pub confidentiality: u16,
    pub integrity: u16,
    pub availability: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct Risk {
    pub threat: String,
    pub vulnerability: String,
    pub current_control: String,
    pub possibility: u32,
    pub impact: u32,
}

/// An assessed asset. `scope` and `create_time` never change once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub create_time: DateTime<Utc>,
    pub scope: Uuid,
    pub big_category: String,
    pub small_category: String,
    pub name: String,
    pub owner: String,
    pub value: AssetValue,
    pub risks: Vec<Risk>,
}

impl Asset {
    /// An empty asset in `scope`, stamped now.
    #[must_use]
    pub fn new(scope: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            create_time: Utc::now(),
            scope,
            big_category: String::new(),
            small_category: String::new(),
            name: String::new(),
            owner: String::new(),
            value: AssetValue::default(),
            risks: Vec::new(),
        }
    }
}
