//! Leaderboard ranker
//!
//! Read-only view over user scores. Order is score descending, then earlier
//! `created_at`, then id ascending, so every user has exactly one position.
//! Entries carry the display name only; account ids are emails and stay
//! private.

use serde::Serialize;
use std::sync::Arc;

use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{ImpactError, Result, User};

/// Default number of entries when the caller gives no limit
pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dept: Option<String>,
    pub score: u64,
    pub tasks_completed: u64,
}

/// A single user's position. `rank` is `None` (JSON `null`) when the user is
/// deeper than the configured depth cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankInfo {
    pub rank: Option<u64>,
    pub score: u64,
}

pub struct LeaderboardRanker {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
    max_limit: usize,
    depth_cap: u64,
}

impl LeaderboardRanker {
    pub fn new(
        store: Arc<dyn ImpactStore>,
        retry: RetryPolicy,
        max_limit: usize,
        depth_cap: u64,
    ) -> Self {
        Self {
            store,
            retry,
            max_limit: max_limit.max(1),
            depth_cap: depth_cap.max(1),
        }
    }

    /// Top `limit` users, clamped to `1..=max_limit`
    pub async fn top_n(&self, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, self.max_limit);

        let users = self
            .retry
            .run("top_users", |_| self.store.top_users(limit))
            .await?;

        Ok(users
            .into_iter()
            .enumerate()
            .map(|(i, user)| entry(i as u64 + 1, user))
            .collect())
    }

    pub async fn rank_of(&self, user_id: &str) -> Result<RankInfo> {
        let user = self
            .retry
            .run("get_user", |_| self.store.get_user(user_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;

        let ahead = self
            .retry
            .run("count_ranked_ahead", |_| {
                self.store.count_ranked_ahead(&user, self.depth_cap)
            })
            .await?;

        Ok(RankInfo {
            rank: (ahead < self.depth_cap).then_some(ahead + 1),
            score: user.impact_score,
        })
    }
}

fn entry(rank: u64, user: User) -> LeaderboardEntry {
    LeaderboardEntry {
        rank,
        name: user.display_name,
        dept: user.dept,
        score: user.impact_score,
        tasks_completed: user.tasks_completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    async fn seed(store: &MemoryStore, id: &str, score: u64, age_secs: i64) {
        let mut user = User::provisioned(id.into(), id.into(), Role::Student);
        user.impact_score = score;
        user.created_at = Utc::now() - Duration::seconds(age_secs);
        store.put_user(user).await;
    }

    async fn ranker(max_limit: usize, depth_cap: u64) -> (Arc<MemoryStore>, LeaderboardRanker) {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "late@x.io", 900, 10).await;
        seed(&store, "early@x.io", 900, 100).await;
        seed(&store, "third@x.io", 700, 500).await;
        let ranker =
            LeaderboardRanker::new(store.clone(), RetryPolicy::immediate(3), max_limit, depth_cap);
        (store, ranker)
    }

    #[tokio::test]
    async fn test_earlier_created_wins_tie() {
        let (_, ranker) = ranker(100, 10_000).await;
        let top = ranker.top_n(Some(3)).await.unwrap();

        let names: Vec<_> = top.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["early@x.io", "late@x.io", "third@x.io"]);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[2].rank, 3);
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let (_, ranker) = ranker(2, 10_000).await;
        assert_eq!(ranker.top_n(Some(50)).await.unwrap().len(), 2);
        assert_eq!(ranker.top_n(Some(0)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rank_of_matches_top_n() {
        let (_, ranker) = ranker(100, 10_000).await;
        let top = ranker.top_n(None).await.unwrap();
        for e in top {
            // seeded display names equal the ids
            let info = ranker.rank_of(&e.name).await.unwrap();
            assert_eq!(info.rank, Some(e.rank));
        }
    }

    #[tokio::test]
    async fn test_rank_beyond_cap_is_null() {
        let (_, ranker) = ranker(100, 2).await;
        assert_eq!(ranker.rank_of("late@x.io").await.unwrap().rank, Some(2));
        assert_eq!(ranker.rank_of("third@x.io").await.unwrap().rank, None);

        let json = serde_json::to_value(ranker.rank_of("third@x.io").await.unwrap()).unwrap();
        assert!(json["rank"].is_null());
    }

    #[tokio::test]
    async fn test_entries_hide_account_ids() {
        let store = Arc::new(MemoryStore::new());
        let mut user = User::provisioned("asha@x.io".into(), "Asha".into(), Role::Student);
        user.impact_score = 10;
        store.put_user(user).await;
        let ranker = LeaderboardRanker::new(store, RetryPolicy::immediate(3), 10, 100);

        let top = serde_json::to_value(ranker.top_n(None).await.unwrap()).unwrap();
        assert_eq!(top[0]["name"], "Asha");
        assert!(!top.to_string().contains("asha@x.io"));

        let rank = serde_json::to_value(ranker.rank_of("asha@x.io").await.unwrap()).unwrap();
        assert_eq!(rank, serde_json::json!({ "rank": 1, "score": 10 }));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (_, ranker) = ranker(100, 10_000).await;
        assert!(matches!(
            ranker.rank_of("ghost@x.io").await,
            Err(ImpactError::NotFound(_))
        ));
    }
}
