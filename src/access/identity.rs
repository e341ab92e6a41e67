use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Normal,
    Administrator,
}

impl Role {
    /// Numeric code used by the storage adapters.
    #[must_use]
    pub const fn code(self) -> i16 {
        match self {
            Self::Normal => 0,
            Self::Administrator => 1,
        }
    }

    #[must_use]
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Administrator),
            _ => None,
        }
    }

    /// The first account ever registered administers the deployment.
    #[must_use]
    pub const fn for_registration(existing_users: u64) -> Self {
        if existing_users == 0 {
            Self::Administrator
        } else {
            Self::Normal
        }
    }
}

/// Verified caller, fixed for the lifetime of the session it was stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
}

impl Identity {
    #[must_use]
    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }
}
