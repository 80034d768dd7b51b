//! User endpoints
//!
//! - `GET /users/me` - caller's record
//! - `PUT /users/me/profile` - edit own display name and department
//! - `PUT /users/{id}/role` - change role (admin)
//! - `POST /users/{id}/corrections` - ledger correction (admin)
//! - `GET /users/{id}/ledger` - ledger audit (self or admin)

use hyper::Response;
use serde::Deserialize;

use super::{ok, ApiRequest, FullBody};
use crate::auth::{RequestContext, Role};
use crate::server::AppState;
use crate::types::{ProfileUpdate, Result};

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub delta: i64,
    pub reason: String,
}

pub fn me(state: &AppState, ctx: &RequestContext) -> Result<Response<FullBody>> {
    ok(&state.users.me(ctx))
}

pub async fn update_profile(
    state: &AppState,
    ctx: &RequestContext,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let update: ProfileUpdate = req.json()?;
    ok(&state.users.update_profile(ctx, update).await?)
}

pub async fn set_role(
    state: &AppState,
    ctx: &RequestContext,
    user_id: &str,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let request: RoleRequest = req.json()?;
    ok(&state.users.set_role(ctx, user_id, request.role).await?)
}

pub async fn correct(
    state: &AppState,
    ctx: &RequestContext,
    user_id: &str,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let request: CorrectionRequest = req.json()?;
    ok(&state
        .ledger
        .correct(ctx, user_id, request.delta, &request.reason)
        .await?)
}

pub async fn ledger(
    state: &AppState,
    ctx: &RequestContext,
    user_id: &str,
) -> Result<Response<FullBody>> {
    ok(&state.ledger.audit(ctx, user_id).await?)
}
