pub mod keystore;
pub mod token;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HephaestusError;

pub use keystore::{Keystore, ServiceAccountKey};
pub use token::TokenVerifier;

/// A role a service-account key may be granted and a token may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    GuardRails,
    Cleanup,
    Analytics,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::GuardRails => "guard-rails",
            Role::Cleanup => "cleanup",
            Role::Analytics => "analytics",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = HephaestusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guard-rails" => Ok(Role::GuardRails),
            "cleanup" => Ok(Role::Cleanup),
            "analytics" => Ok(Role::Analytics),
            other => Err(HephaestusError::Validation(format!(
                "unknown role '{other}'"
            ))),
        }
    }
}

/// The identity and grants attached to a request once its bearer token verifies.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal: String,
    pub roles: HashSet<Role>,
    pub key_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedPrincipal {
    pub fn require_role(&self, role: Role) -> Result<(), HephaestusError> {
        if self.roles.contains(&role) {
            Ok(())
        } else {
            Err(HephaestusError::Authorization {
                principal: self.principal.clone(),
                role: role.to_string(),
            })
        }
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.roles.contains(r))
    }
}
