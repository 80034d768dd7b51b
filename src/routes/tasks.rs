//! Task catalog endpoints
//!
//! - `GET /tasks` - list tasks
//! - `GET /tasks/{id}` - one task
//! - `POST /tasks` - create (admin)
//! - `PUT /tasks/{id}` - edit (admin)
//! - `DELETE /tasks/{id}` - delete an unreferenced task (admin)

use hyper::Response;
use serde_json::json;

use super::{created, ok, ApiRequest, FullBody};
use crate::auth::RequestContext;
use crate::server::AppState;
use crate::types::{NewTask, Result, TaskUpdate};

pub async fn list(state: &AppState) -> Result<Response<FullBody>> {
    ok(&state.catalog.list().await?)
}

pub async fn get(state: &AppState, task_id: &str) -> Result<Response<FullBody>> {
    ok(&state.catalog.get(task_id).await?)
}

pub async fn create(
    state: &AppState,
    ctx: &RequestContext,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let request: NewTask = req.json()?;
    created(&state.catalog.create(ctx, request).await?)
}

pub async fn update(
    state: &AppState,
    ctx: &RequestContext,
    task_id: &str,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    let update: TaskUpdate = req.json()?;
    ok(&state.catalog.update(ctx, task_id, update).await?)
}

pub async fn delete(
    state: &AppState,
    ctx: &RequestContext,
    task_id: &str,
) -> Result<Response<FullBody>> {
    state.catalog.delete(ctx, task_id).await?;
    ok(&json!({ "deleted": true, "id": task_id }))
}
