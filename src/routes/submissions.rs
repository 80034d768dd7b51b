//! Submission endpoints
//!
//! - `POST /submissions` - create a pending submission (student)
//! - `GET /submissions/pending` - review queue (mentor, admin)
//! - `GET /submissions/mine` - caller's submissions
//! - `GET /submissions/{id}` - owner or reviewer
//! - `POST /submissions/{id}/verify` - approve or reject (mentor, admin)

use hyper::Response;
use serde::Deserialize;
use std::sync::Arc;

use super::{created, detached, ok, ApiRequest, FullBody};
use crate::auth::RequestContext;
use crate::server::AppState;
use crate::services::{Decision, NewSubmission};
use crate::types::Result;

/// Body of `POST /submissions/{id}/verify`
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub decision: Decision,
    #[serde(default)]
    pub feedback: Option<String>,
}

pub async fn create(
    state: &AppState,
    ctx: &RequestContext,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let request: NewSubmission = req.json()?;
    created(&state.submissions.create(ctx, request).await?)
}

pub async fn pending(state: &AppState, ctx: &RequestContext) -> Result<Response<FullBody>> {
    ok(&state.submissions.pending(ctx).await?)
}

pub async fn mine(state: &AppState, ctx: &RequestContext) -> Result<Response<FullBody>> {
    ok(&state.submissions.mine(ctx).await?)
}

pub async fn get(
    state: &AppState,
    ctx: &RequestContext,
    submission_id: &str,
) -> Result<Response<FullBody>> {
    ok(&state.submissions.get(ctx, submission_id).await?)
}

pub async fn verify(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    submission_id: &str,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let request: VerifyRequest = req.json()?;
    let state = Arc::clone(state);
    let ctx = ctx.clone();
    let submission_id = submission_id.to_string();
    let submission = detached(async move {
        state
            .verification
            .verify(
                &ctx,
                &submission_id,
                request.decision,
                request.feedback.as_deref(),
            )
            .await
    })
    .await?;
    ok(&submission)
}
