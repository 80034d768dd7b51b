//! Companion matchmaker
//!
//! Pairs a student with another unpaired student on the same task. The link
//! is written for both users in one atomic store call guarded by "both still
//! unpaired", so two callers can never claim the same candidate.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::RequestContext;
use crate::services::notifier::{MentorNotifier, MentorRequest};
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{ImpactError, LinkOutcome, Result, Task, User};

/// Searches before giving up with `Conflict`
const CLAIM_ROUNDS: u32 = 2;

/// What a student sees of their companion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionProfile {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dept: Option<String>,
}

impl From<User> for CompanionProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            dept: user.dept,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompanionMatch {
    Paired { companion: CompanionProfile },
    /// Nobody available; a mentor has been asked to step in
    MentorRequested,
}

pub struct CompanionMatchmaker {
    store: Arc<dyn ImpactStore>,
    notifier: Arc<dyn MentorNotifier>,
    retry: RetryPolicy,
}

impl CompanionMatchmaker {
    pub fn new(
        store: Arc<dyn ImpactStore>,
        notifier: Arc<dyn MentorNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Put the caller on `task_id` and pair them if possible.
    ///
    /// A pairing belongs to the two people, not to the task it was made on.
    /// A paired caller who opens another task keeps their companion and gets
    /// it back here; only [`release`](Self::release) ends the pairing.
    pub async fn find_companion(&self, ctx: &RequestContext, task_id: &str) -> Result<CompanionMatch> {
        let user_id = ctx.user_id();

        let task = self
            .retry
            .run("get_task", |_| self.store.get_task(task_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Task".into()))?;

        let me = self
            .retry
            .run("set_current_task", |_| self.store.set_current_task(user_id, task_id))
            .await?;

        if let Some(companion_id) = &me.companion_id {
            debug!(user = user_id, companion = %companion_id, "Already paired");
            return self.paired_with(companion_id).await;
        }

        for round in 1..=CLAIM_ROUNDS {
            let candidate = self
                .retry
                .run("find_match_candidate", |_| {
                    self.store.find_match_candidate(task_id, user_id)
                })
                .await?;

            let Some(candidate) = candidate else {
                // A concurrent caller may have claimed us before our search ran
                if let Some(companion_id) = self.current_companion(user_id).await? {
                    return self.paired_with(&companion_id).await;
                }
                self.request_mentor(&me, &task);
                return Ok(CompanionMatch::MentorRequested);
            };

            let outcome = self
                .retry
                .run("link_companions", |_| {
                    self.store.link_companions(user_id, &candidate.id, task_id)
                })
                .await?;

            if outcome == LinkOutcome::Linked {
                info!(
                    request_id = %ctx.request_id,
                    user = user_id,
                    companion = %candidate.id,
                    task = task_id,
                    "Companions paired"
                );
                return Ok(CompanionMatch::Paired {
                    companion: candidate.into(),
                });
            }

            // Lost the claim. Someone may have paired with us meanwhile, or a
            // retried link may already have committed.
            if let Some(companion_id) = self.current_companion(user_id).await? {
                return self.paired_with(&companion_id).await;
            }

            debug!(user = user_id, candidate = %candidate.id, round, "Lost companion claim");
        }

        warn!(user = user_id, task = task_id, "Companion matching contended");
        Err(ImpactError::Conflict(
            "Another match completed first, try again".into(),
        ))
    }

    /// Clear the caller's pairing on both sides. Returns the former companion.
    pub async fn release(&self, ctx: &RequestContext) -> Result<Option<String>> {
        let user_id = ctx.user_id();
        let former = self
            .retry
            .run("unlink_companion", |_| self.store.unlink_companion(user_id))
            .await?;

        if let Some(former) = &former {
            info!(user = user_id, companion = %former, "Companion pairing released");
        }
        Ok(former)
    }

    async fn current_companion(&self, user_id: &str) -> Result<Option<String>> {
        let current = self
            .retry
            .run("get_user", |_| self.store.get_user(user_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;
        Ok(current.companion_id)
    }

    async fn paired_with(&self, companion_id: &str) -> Result<CompanionMatch> {
        let companion = self
            .retry
            .run("get_user", |_| self.store.get_user(companion_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Companion".into()))?;
        Ok(CompanionMatch::Paired {
            companion: companion.into(),
        })
    }

    fn request_mentor(&self, user: &User, task: &Task) {
        let request = MentorRequest {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            requested_at: Utc::now(),
        };
        let notifier = Arc::clone(&self.notifier);

        tokio::spawn(async move {
            let user = request.user_id.clone();
            if let Err(e) = notifier.mentor_requested(request).await {
                warn!(user = %user, error = %e, "Mentor request not delivered");
            }
        });
    }
}
