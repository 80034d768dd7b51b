//! Identity token handling
//!
//! Principals arrive with an HS256 JWT minted by the external identity
//! provider. We only trust the verified email in it; role, score and any
//! other custom claims are ignored.
//!
//! Security notes:
//! - Tokens are signed with HS256 (HMAC-SHA256)
//! - The secret is shared with the identity provider and must be at least 32 characters
//! - `generate_token` exists for dev mode and tests

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::ImpactError;

/// Fixed secret used when running with `--dev-mode`
pub const DEV_SECRET: &str = "dev-mode-identity-secret-not-for-production";

/// Claims read from an identity token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Provider subject id
    pub sub: String,
    /// Email address asserted by the provider
    pub email: String,
    /// Whether the provider verified the email
    #[serde(default)]
    pub email_verified: bool,
    /// Display name, used only when provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

impl IdentityClaims {
    /// Stable identity key: the verified email, lower-cased
    pub fn identity_key(&self) -> Option<String> {
        if !self.email_verified {
            return None;
        }
        let email = self.email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return None;
        }
        Some(email)
    }
}

/// Input for minting a token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
}

/// Result of token validation
#[derive(Debug)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<IdentityClaims>,
    pub error: Option<String>,
}

impl TokenValidationResult {
    pub fn valid(claims: IdentityClaims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.into()),
        }
    }
}

/// Identity token validator (and dev-mode minter)
#[derive(Clone)]
pub struct IdentityTokenValidator {
    secret: String,
    expiry_seconds: u64,
}

impl IdentityTokenValidator {
    /// Create a validator with the provider's shared secret
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self, ImpactError> {
        if secret.is_empty() {
            return Err(ImpactError::Config(
                "IDENTITY_JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(ImpactError::Config(
                "IDENTITY_JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Create a validator for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: DEV_SECRET.into(),
            expiry_seconds: 3600,
        }
    }

    /// Mint a token (dev mode and tests)
    pub fn generate_token(&self, input: TokenInput) -> Result<String, ImpactError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ImpactError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = IdentityClaims {
            sub: input.subject,
            email: input.email,
            email_verified: input.email_verified,
            name: input.name,
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ImpactError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a token
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        let validation = Validation::default();

        match decode::<IdentityClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        ) {
            Ok(token_data) => TokenValidationResult::valid(token_data.claims),
            Err(err) => {
                use jsonwebtoken::errors::ErrorKind;
                let error_msg = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidToken => "Invalid token",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Token validation failed",
                };
                TokenValidationResult::invalid(error_msg)
            }
        }
    }
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_validator() -> IdentityTokenValidator {
        IdentityTokenValidator::new(
            "test-secret-that-is-at-least-32-characters-long".into(),
            3600,
        )
        .unwrap()
    }

    fn input(email: &str, verified: bool) -> TokenInput {
        TokenInput {
            subject: "provider|123".into(),
            email: email.into(),
            email_verified: verified,
            name: Some("Asha".into()),
        }
    }

    #[test]
    fn test_generate_and_verify_token() {
        let validator = test_validator();
        let token = validator
            .generate_token(input("Asha@Example.edu", true))
            .unwrap();

        let result = validator.verify_token(&token);
        assert!(result.valid);

        let claims = result.claims.unwrap();
        assert_eq!(claims.identity_key().as_deref(), Some("asha@example.edu"));
        assert_eq!(claims.name.as_deref(), Some("Asha"));
    }

    #[test]
    fn test_unverified_email_has_no_identity() {
        let validator = test_validator();
        let token = validator
            .generate_token(input("asha@example.edu", false))
            .unwrap();
        let claims = validator.verify_token(&token).claims.unwrap();
        assert_eq!(claims.identity_key(), None);
    }

    #[test]
    fn test_wrong_secret() {
        let other = IdentityTokenValidator::new(
            "different-secret-that-is-at-least-32-characters".into(),
            3600,
        )
        .unwrap();
        let token = other.generate_token(input("a@b.c", true)).unwrap();

        let result = test_validator().verify_token(&token);
        assert!(!result.valid);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_role_claim_is_ignored() {
        // A forged token carrying a role claim still decodes to plain identity claims.
        let validator = test_validator();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let forged = serde_json::json!({
            "sub": "x",
            "email": "mallory@example.edu",
            "email_verified": true,
            "role": "admin",
            "adminKey": "letmein",
            "iat": now,
            "exp": now + 60,
        });
        let token = encode(
            &Header::default(),
            &forged,
            &EncodingKey::from_secret(b"test-secret-that-is-at-least-32-characters-long"),
        )
        .unwrap();

        let claims = validator.verify_token(&token).claims.unwrap();
        let reencoded = serde_json::to_value(&claims).unwrap();
        assert!(reencoded.get("role").is_none());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(
            extract_token_from_header(Some("Bearer abc123")),
            Some("abc123")
        );
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("")), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }

    #[test]
    fn test_secret_validation() {
        assert!(IdentityTokenValidator::new("short".into(), 3600).is_err());
        assert!(IdentityTokenValidator::new("".into(), 3600).is_err());
        assert!(
            IdentityTokenValidator::new("this-secret-is-at-least-32-chars-long".into(), 3600)
                .is_ok()
        );
    }
}
