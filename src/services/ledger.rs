//! Reward ledger
//!
//! The only component that changes `impact_score` or `tasks_completed`.
//! Every change is a credit entry with an idempotency key, so replays are
//! no-ops and a user's score can be rebuilt from their entries.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::{authorize, RequestContext, ADMINS};
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{
    CreditEntry, CreditKind, CreditOutcome, ImpactError, Result, Submission, Task, User,
};

/// Stored counters next to the totals rebuilt from the ledger
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAudit {
    pub user_id: String,
    pub stored_score: u64,
    pub stored_tasks_completed: u64,
    pub ledger_score: i64,
    pub ledger_tasks_completed: u64,
    pub consistent: bool,
    pub entries: Vec<CreditEntry>,
}

pub struct RewardLedger {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
}

impl RewardLedger {
    pub fn new(store: Arc<dyn ImpactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Entry crediting `task.score` for an approved submission. The
    /// submission id is the idempotency key.
    pub fn approval_entry(
        submission: &Submission,
        task: &Task,
        reviewer_id: &str,
    ) -> Result<CreditEntry> {
        let amount = i64::try_from(task.score).map_err(|_| {
            ImpactError::Validation(format!("Task '{}' has a score too large to credit", task.id))
        })?;
        Ok(CreditEntry {
            key: submission.id.clone(),
            user_id: submission.student_id.clone(),
            amount,
            kind: CreditKind::Approval,
            submission_id: Some(submission.id.clone()),
            task_id: Some(task.id.clone()),
            applied_by: reviewer_id.to_string(),
            reason: None,
            applied_at: Utc::now(),
        })
    }

    /// Credit `amount` to `user_id` once per `idempotency_key`.
    ///
    /// Counts as a completed task. A key that was already applied returns
    /// `AlreadyApplied` and changes nothing.
    ///
    /// This is the entry point for credits that have no submission to close,
    /// such as imports or replays driven by an operator. Approvals do not come
    /// through here: the verification workflow builds the entry with
    /// [`approval_entry`](Self::approval_entry) and hands it to
    /// `close_submission`, so the status change and the credit commit together.
    pub async fn credit(
        &self,
        user_id: &str,
        amount: u64,
        idempotency_key: &str,
        applied_by: &str,
    ) -> Result<CreditOutcome> {
        let amount = i64::try_from(amount)
            .map_err(|_| ImpactError::Validation("Credit amount is too large".into()))?;
        let entry = CreditEntry {
            key: idempotency_key.to_string(),
            user_id: user_id.to_string(),
            amount,
            kind: CreditKind::Approval,
            submission_id: None,
            task_id: None,
            applied_by: applied_by.to_string(),
            reason: None,
            applied_at: Utc::now(),
        };

        let outcome = self
            .retry
            .run("apply_credit", |_| self.store.apply_credit(entry.clone()))
            .await?;

        if outcome.was_applied() {
            info!(user = user_id, amount, key = idempotency_key, "Credit applied");
        }
        Ok(outcome)
    }

    /// Administrative score correction. Recorded as its own entry so the
    /// ledger stays the source of truth; does not touch `tasks_completed`.
    pub async fn correct(
        &self,
        ctx: &RequestContext,
        user_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<User> {
        authorize(&ctx.principal, ADMINS)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ImpactError::Validation(
                "A correction needs a reason".into(),
            ));
        }
        if delta == 0 {
            return Err(ImpactError::Validation(
                "A correction must change the score".into(),
            ));
        }

        let entry = CreditEntry {
            key: format!("correction:{}", Uuid::new_v4()),
            user_id: user_id.to_string(),
            amount: delta,
            kind: CreditKind::Correction,
            submission_id: None,
            task_id: None,
            applied_by: ctx.principal.id.clone(),
            reason: Some(reason.to_string()),
            applied_at: Utc::now(),
        };

        let outcome = self
            .retry
            .run("apply_correction", |_| self.store.apply_credit(entry.clone()))
            .await?;

        let user = match outcome {
            CreditOutcome::Applied(user) => user,
            // A retry after a lost acknowledgement lands here
            CreditOutcome::AlreadyApplied => self
                .store
                .get_user(user_id)
                .await?
                .ok_or_else(|| ImpactError::NotFound("User".into()))?,
        };

        info!(
            admin = %ctx.principal.id,
            user = user_id,
            delta,
            new_score = user.impact_score,
            "Score corrected"
        );
        Ok(user)
    }

    /// Rebuild a user's totals from their entries. Open to the user and to
    /// admins.
    pub async fn audit(&self, ctx: &RequestContext, user_id: &str) -> Result<LedgerAudit> {
        if ctx.principal.id != user_id {
            authorize(&ctx.principal, ADMINS)?;
        }

        let user = self
            .retry
            .run("get_user", |_| self.store.get_user(user_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;
        let entries = self
            .retry
            .run("credits_for", |_| self.store.credits_for(user_id))
            .await?;

        let ledger_score: i64 = entries.iter().map(|e| e.amount).sum();
        let ledger_tasks_completed = entries.iter().filter(|e| e.completes_task()).count() as u64;

        Ok(LedgerAudit {
            consistent: ledger_score == user.impact_score as i64
                && ledger_tasks_completed == user.tasks_completed,
            user_id: user.id,
            stored_score: user.impact_score,
            stored_tasks_completed: user.tasks_completed,
            ledger_score,
            ledger_tasks_completed,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, RewardLedger) {
        let store = Arc::new(MemoryStore::new());
        for (id, role) in [
            ("admin@x.io", Role::Admin),
            ("mentor@x.io", Role::Mentor),
            ("u1@x.io", Role::Student),
        ] {
            store
                .provision_user(User::provisioned(id.into(), id.into(), role))
                .await
                .unwrap();
        }
        let ledger = RewardLedger::new(store.clone(), RetryPolicy::immediate(3));
        (store, ledger)
    }

    async fn ctx(store: &MemoryStore, id: &str) -> RequestContext {
        RequestContext::new(store.get_user(id).await.unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let (store, ledger) = setup().await;

        let first = ledger.credit("u1@x.io", 500, "S1", "mentor@x.io").await.unwrap();
        let second = ledger.credit("u1@x.io", 500, "S1", "mentor@x.io").await.unwrap();

        assert!(first.was_applied());
        assert_eq!(second, CreditOutcome::AlreadyApplied);
        let u1 = store.get_user("u1@x.io").await.unwrap().unwrap();
        assert_eq!((u1.impact_score, u1.tasks_completed), (500, 1));
    }

    #[tokio::test]
    async fn test_correction_requires_admin_and_reason() {
        let (store, ledger) = setup().await;
        let mentor = ctx(&store, "mentor@x.io").await;
        let admin = ctx(&store, "admin@x.io").await;

        assert_eq!(
            ledger.correct(&mentor, "u1@x.io", 10, "bonus").await.unwrap_err(),
            ImpactError::AuthorizationDenied
        );
        assert!(matches!(
            ledger.correct(&admin, "u1@x.io", 10, "  ").await,
            Err(ImpactError::Validation(_))
        ));

        let user = ledger.correct(&admin, "u1@x.io", 10, "bonus").await.unwrap();
        assert_eq!(user.impact_score, 10);
        assert_eq!(user.tasks_completed, 0);
    }

    #[tokio::test]
    async fn test_correction_cannot_go_negative() {
        let (store, ledger) = setup().await;
        let admin = ctx(&store, "admin@x.io").await;
        ledger.credit("u1@x.io", 50, "S1", "mentor@x.io").await.unwrap();

        let result = ledger.correct(&admin, "u1@x.io", -80, "clawback").await;
        assert!(matches!(result, Err(ImpactError::Validation(_))));
        assert_eq!(
            store.get_user("u1@x.io").await.unwrap().unwrap().impact_score,
            50
        );
    }

    #[tokio::test]
    async fn test_audit_matches_stored_totals() {
        let (store, ledger) = setup().await;
        let admin = ctx(&store, "admin@x.io").await;
        ledger.credit("u1@x.io", 300, "S1", "mentor@x.io").await.unwrap();
        ledger.credit("u1@x.io", 200, "S2", "mentor@x.io").await.unwrap();
        ledger.correct(&admin, "u1@x.io", -100, "duplicate task").await.unwrap();

        let me = ctx(&store, "u1@x.io").await;
        let audit = ledger.audit(&me, "u1@x.io").await.unwrap();
        assert!(audit.consistent);
        assert_eq!(audit.ledger_score, 400);
        assert_eq!(audit.ledger_tasks_completed, 2);
        assert_eq!(audit.entries.len(), 3);

        let mentor = ctx(&store, "mentor@x.io").await;
        assert!(ledger.audit(&mentor, "u1@x.io").await.is_err());
    }
}
