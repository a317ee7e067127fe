//! Authenticated caller identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Authorization role attached to a user account.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// May submit and read reports.
    User,
    /// May read, update and delete reports.
    Admin,
}

impl Role {
    /// Storage and token representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Admin => "ADMIN",
        }
    }

    /// Parse the storage representation.
    ///
    /// A leading `ROLE_` is accepted for accounts imported from systems that
    /// store authorities in that form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.strip_prefix("ROLE_").unwrap_or(s) {
            "USER" => Some(Self::User),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller, passed explicitly into every service operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Login name.
    pub username: String,
    /// Current role, as loaded from the user store.
    pub role: Role,
}

impl Principal {
    /// Create a principal.
    #[must_use]
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// Whether the principal holds any of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}
