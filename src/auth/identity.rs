//! Identity resolution
//!
//! Maps an identity token to the stored user record, provisioning a student
//! record the first time a verified identity shows up.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::jwt::{extract_token_from_header, IdentityTokenValidator};
use super::roles::Role;
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{ImpactError, Result, User};

/// Per-request principal. Built once by the resolver and passed explicitly
/// to every operation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// User record as loaded from the store for this request
    pub principal: User,
    pub request_id: Uuid,
}

impl RequestContext {
    pub fn new(principal: User) -> Self {
        Self {
            principal,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.principal.id
    }
}

/// Resolves identity tokens to request contexts
pub struct IdentityResolver {
    validator: IdentityTokenValidator,
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
    /// Identity keys provisioned as admin instead of student
    bootstrap_admins: HashSet<String>,
}

impl IdentityResolver {
    pub fn new(
        validator: IdentityTokenValidator,
        store: Arc<dyn ImpactStore>,
        retry: RetryPolicy,
        bootstrap_admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            validator,
            store,
            retry,
            bootstrap_admins: bootstrap_admins
                .into_iter()
                .map(|e| e.trim().to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Resolve the `Authorization` header value to a request context.
    ///
    /// Any token problem is reported as `AuthenticationRequired`; the detail
    /// is only logged.
    pub async fn resolve(&self, auth_header: Option<&str>) -> Result<RequestContext> {
        let token =
            extract_token_from_header(auth_header).ok_or(ImpactError::AuthenticationRequired)?;

        let result = self.validator.verify_token(token);
        let claims = match (result.valid, result.claims) {
            (true, Some(claims)) => claims,
            _ => {
                debug!(error = ?result.error, "Identity token rejected");
                return Err(ImpactError::AuthenticationRequired);
            }
        };

        let Some(key) = claims.identity_key() else {
            debug!(sub = %claims.sub, "Identity token has no verified email");
            return Err(ImpactError::AuthenticationRequired);
        };

        if let Some(user) = self
            .retry
            .run("get_user", |_| self.store.get_user(&key))
            .await?
        {
            return Ok(RequestContext::new(user));
        }

        let role = if self.bootstrap_admins.contains(&key) {
            Role::Admin
        } else {
            Role::Student
        };
        let display_name = claims
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| key.split('@').next().unwrap_or(&key).to_string());

        let candidate = User::provisioned(key, display_name, role);
        let user = self
            .retry
            .run("provision_user", |_| self.store.provision_user(candidate.clone()))
            .await?;

        info!(user = %user.id, role = %user.role, "Provisioned user");
        Ok(RequestContext::new(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenInput;
    use crate::store::MemoryStore;

    fn resolver(store: Arc<MemoryStore>) -> IdentityResolver {
        IdentityResolver::new(
            IdentityTokenValidator::new_dev(),
            store,
            RetryPolicy::immediate(3),
            vec!["Root@Example.edu".to_string()],
        )
    }

    fn token(email: &str, verified: bool) -> String {
        IdentityTokenValidator::new_dev()
            .generate_token(TokenInput {
                subject: "provider|1".into(),
                email: email.into(),
                email_verified: verified,
                name: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_sight_provisions_student() {
        let store = Arc::new(MemoryStore::new());
        let resolver = resolver(store.clone());

        let header = format!("Bearer {}", token("New@Example.edu", true));
        let ctx = resolver.resolve(Some(&header)).await.unwrap();

        assert_eq!(ctx.principal.id, "new@example.edu");
        assert_eq!(ctx.principal.role, Role::Student);
        assert_eq!(ctx.principal.impact_score, 0);
        assert_eq!(ctx.principal.display_name, "new");
        assert!(store.get_user("new@example.edu").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_admin_provisioned_as_admin() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let header = format!("Bearer {}", token("root@example.edu", true));
        let ctx = resolver.resolve(Some(&header)).await.unwrap();
        assert_eq!(ctx.principal.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_existing_record_wins() {
        let store = Arc::new(MemoryStore::new());
        let mut mentor = User::provisioned("m@example.edu".into(), "M".into(), Role::Mentor);
        mentor.impact_score = 40;
        store.put_user(mentor).await;

        let header = format!("Bearer {}", token("m@example.edu", true));
        let ctx = resolver(store).resolve(Some(&header)).await.unwrap();
        assert_eq!(ctx.principal.role, Role::Mentor);
        assert_eq!(ctx.principal.impact_score, 40);
    }

    #[tokio::test]
    async fn test_rejects_missing_invalid_and_unverified() {
        let resolver = resolver(Arc::new(MemoryStore::new()));

        assert_eq!(
            resolver.resolve(None).await.unwrap_err(),
            ImpactError::AuthenticationRequired
        );
        assert_eq!(
            resolver.resolve(Some("Bearer garbage")).await.unwrap_err(),
            ImpactError::AuthenticationRequired
        );

        let unverified = format!("Bearer {}", token("u@example.edu", false));
        assert_eq!(
            resolver.resolve(Some(&unverified)).await.unwrap_err(),
            ImpactError::AuthenticationRequired
        );
    }

    #[tokio::test]
    async fn test_contexts_are_per_request() {
        let resolver = resolver(Arc::new(MemoryStore::new()));
        let header = format!("Bearer {}", token("a@example.edu", true));
        let first = resolver.resolve(Some(&header)).await.unwrap();
        let second = resolver.resolve(Some(&header)).await.unwrap();
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(first.principal.id, second.principal.id);
    }
}
