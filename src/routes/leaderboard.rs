//! Leaderboard endpoints
//!
//! - `GET /leaderboard?limit=N` - top N users
//! - `GET /users/{id}/rank` - one user's rank (`null` past the depth cap)

use hyper::Response;

use super::{ok, ApiRequest, FullBody};
use crate::server::AppState;
use crate::types::{ImpactError, Result};

pub async fn top(state: &AppState, req: &ApiRequest) -> Result<Response<FullBody>> {
    let limit = match req.query_param("limit") {
        None => None,
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| {
            ImpactError::Validation("limit must be a non-negative integer".into())
        })?),
    };
    ok(&state.leaderboard.top_n(limit).await?)
}

pub async fn rank(state: &AppState, user_id: &str) -> Result<Response<FullBody>> {
    ok(&state.leaderboard.rank_of(user_id).await?)
}
