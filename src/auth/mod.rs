//! Authentication and authorization for impact-core
//!
//! Provides:
//! - Identity token validation (HS256, issued by the identity provider)
//! - Identity resolution and first-sight provisioning
//! - Roles and the role guard

pub mod identity;
pub mod jwt;
pub mod roles;

pub use identity::{IdentityResolver, RequestContext};
pub use jwt::{
    extract_token_from_header, IdentityClaims, DEV_SECRET, IdentityTokenValidator, TokenInput,
    TokenValidationResult,
};
pub use roles::{authorize, Role, ADMINS, REVIEWERS, STUDENTS};
