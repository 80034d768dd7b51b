//! Profile reads and edits, and admin role management

use std::sync::Arc;
use tracing::info;

use crate::auth::{authorize, RequestContext, Role, ADMINS};
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{ImpactError, ProfileUpdate, Result, User};

const MAX_NAME_LEN: usize = 80;
const MAX_DEPT_LEN: usize = 80;

pub struct UserDirectory {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn ImpactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn me(&self, ctx: &RequestContext) -> User {
        ctx.principal.clone()
    }

    /// Edit the caller's own display name and department
    pub async fn update_profile(&self, ctx: &RequestContext, update: ProfileUpdate) -> Result<User> {
        let display_name = match update.display_name.as_deref().map(str::trim) {
            Some("") => {
                return Err(ImpactError::Validation("Display name cannot be empty".into()))
            }
            Some(name) if name.chars().count() > MAX_NAME_LEN => {
                return Err(ImpactError::Validation(format!(
                    "Display name must be at most {MAX_NAME_LEN} characters"
                )))
            }
            other => other.map(str::to_string),
        };
        let dept = update.dept.as_deref().map(str::trim).map(str::to_string);
        if dept.as_ref().is_some_and(|d| d.chars().count() > MAX_DEPT_LEN) {
            return Err(ImpactError::Validation(format!(
                "Department must be at most {MAX_DEPT_LEN} characters"
            )));
        }

        let update = ProfileUpdate { display_name, dept };
        let user_id = ctx.user_id();
        self.retry
            .run("update_profile", |_| self.store.update_profile(user_id, &update))
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))
    }

    /// Admin only, and never on the caller's own record
    pub async fn set_role(&self, ctx: &RequestContext, user_id: &str, role: Role) -> Result<User> {
        authorize(&ctx.principal, ADMINS)?;
        if user_id == ctx.principal.id {
            return Err(ImpactError::Validation(
                "You cannot change your own role".into(),
            ));
        }

        let user = self
            .retry
            .run("set_role", |_| self.store.set_role(user_id, role))
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;

        info!(admin = %ctx.principal.id, user = user_id, role = %role, "Role changed");
        Ok(user)
    }
}
