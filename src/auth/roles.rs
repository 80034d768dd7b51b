//! Roles and the role guard for privileged operations
//!
//! Roles are read from the store of record on every request. Nothing the
//! client sends can raise them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::types::{ImpactError, User};

/// Closed set of participant roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Submits work, earns score, can be paired
    #[default]
    Student,
    /// Reviews submissions
    Mentor,
    /// Reviews submissions, manages catalog, roles and corrections
    Admin,
}

/// Roles allowed to close submissions
pub const REVIEWERS: &[Role] = &[Role::Mentor, Role::Admin];

/// Roles allowed to submit work
pub const STUDENTS: &[Role] = &[Role::Student];

/// Roles allowed to manage the catalog, roles and ledger corrections
pub const ADMINS: &[Role] = &[Role::Admin];

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "mentor" => Ok(Role::Mentor),
            "admin" => Ok(Role::Admin),
            other => Err(ImpactError::Validation(format!("Unknown role '{other}'"))),
        }
    }
}

/// Authorize `user` for an operation open to `required` roles.
///
/// Fails closed: an empty `required` set allows nobody. The denial carries
/// no detail; the reason is logged here instead.
pub fn authorize(user: &User, required: &[Role]) -> Result<(), ImpactError> {
    if required.contains(&user.role) {
        return Ok(());
    }

    warn!(
        principal = %user.id,
        role = %user.role,
        required = ?required,
        "Authorization denied"
    );
    Err(ImpactError::AuthorizationDenied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_role(role: Role) -> User {
        User::provisioned("someone@example.edu".into(), "Someone".into(), role)
    }

    #[test]
    fn test_reviewer_operations() {
        assert!(authorize(&with_role(Role::Mentor), REVIEWERS).is_ok());
        assert!(authorize(&with_role(Role::Admin), REVIEWERS).is_ok());
        assert_eq!(
            authorize(&with_role(Role::Student), REVIEWERS),
            Err(ImpactError::AuthorizationDenied)
        );
    }

    #[test]
    fn test_admin_operations() {
        assert!(authorize(&with_role(Role::Admin), ADMINS).is_ok());
        assert!(authorize(&with_role(Role::Mentor), ADMINS).is_err());
        assert!(authorize(&with_role(Role::Student), ADMINS).is_err());
    }

    #[test]
    fn test_empty_requirement_blocks_everyone() {
        assert!(authorize(&with_role(Role::Admin), &[]).is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Mentor".parse::<Role>().unwrap(), Role::Mentor);
        assert_eq!(" admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("superuser".parse::<Role>().is_err());
    }
}
