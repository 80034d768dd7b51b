//! Companion endpoints
//!
//! - `POST /tasks/{id}/companion` - join the task and look for a companion
//! - `DELETE /users/me/companion` - release the current pairing

use hyper::Response;
use serde_json::json;
use std::sync::Arc;

use super::{detached, ok, FullBody};
use crate::auth::RequestContext;
use crate::server::AppState;
use crate::types::Result;

pub async fn find(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    task_id: &str,
) -> Result<Response<FullBody>> {
    let state = Arc::clone(state);
    let ctx = ctx.clone();
    let task_id = task_id.to_string();
    let outcome =
        detached(async move { state.matchmaker.find_companion(&ctx, &task_id).await }).await?;
    ok(&outcome)
}

pub async fn release(state: &AppState, ctx: &RequestContext) -> Result<Response<FullBody>> {
    let former = state.matchmaker.release(ctx).await?;
    ok(&json!({ "released": former.is_some(), "formerCompanionId": former }))
}
