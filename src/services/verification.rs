//! Verification workflow
//!
//! Moves a pending submission to approved or rejected. Approval flips the
//! status and credits the task score in one atomic store call, so a
//! submission is credited exactly once whatever the retries or races.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{authorize, RequestContext, REVIEWERS};
use crate::services::ledger::RewardLedger;
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{
    CloseOutcome, Closure, ImpactError, Result, Submission, SubmissionStatus,
};

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(self) -> SubmissionStatus {
        match self {
            Decision::Approved => SubmissionStatus::Approved,
            Decision::Rejected => SubmissionStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

impl FromStr for Decision {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            other => Err(ImpactError::Validation(format!(
                "Unknown decision '{other}'"
            ))),
        }
    }
}

pub struct VerificationWorkflow {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
}

impl VerificationWorkflow {
    pub fn new(store: Arc<dyn ImpactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Close `submission_id` with `decision`.
    ///
    /// Rejection needs non-empty feedback. On approval the feedback is an
    /// optional note.
    pub async fn verify(
        &self,
        ctx: &RequestContext,
        submission_id: &str,
        decision: Decision,
        feedback: Option<&str>,
    ) -> Result<Submission> {
        let reviewer = &ctx.principal;
        authorize(reviewer, REVIEWERS)?;

        let feedback = feedback.map(str::trim).filter(|f| !f.is_empty());
        if decision == Decision::Rejected && feedback.is_none() {
            return Err(ImpactError::Validation(
                "Feedback is required when rejecting a submission".into(),
            ));
        }

        let submission = self
            .retry
            .run("get_submission", |_| self.store.get_submission(submission_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Submission".into()))?;

        if submission.student_id == reviewer.id {
            warn!(
                principal = %reviewer.id,
                submission = submission_id,
                "Reviewer attempted to verify own submission"
            );
            return Err(ImpactError::AuthorizationDenied);
        }
        if submission.status.is_terminal() {
            return Err(ImpactError::Conflict("Submission already processed".into()));
        }

        let credit = match decision {
            Decision::Approved => {
                let task = self
                    .retry
                    .run("get_task", |_| self.store.get_task(&submission.task_id))
                    .await?
                    .ok_or_else(|| ImpactError::NotFound("Task".into()))?;
                Some(RewardLedger::approval_entry(&submission, &task, &reviewer.id)?)
            }
            Decision::Rejected => None,
        };

        let closure = Closure {
            status: decision.status(),
            feedback: feedback.map(str::to_string),
            verified_at: Utc::now(),
            verifier_id: reviewer.id.clone(),
        };

        let outcome = self
            .retry
            .run("close_submission", |attempt| {
                let closure = closure.clone();
                let credit = credit.clone();
                async move {
                    match self
                        .store
                        .close_submission(submission_id, closure, credit)
                        .await
                    {
                        // An earlier attempt may have committed before failing
                        Err(ImpactError::Conflict(msg)) if attempt > 1 => self
                            .replayed(submission_id, &reviewer.id, decision)
                            .await?
                            .map(|submission| CloseOutcome {
                                submission,
                                credit: None,
                            })
                            .ok_or(ImpactError::Conflict(msg)),
                        other => other,
                    }
                }
            })
            .await?;

        info!(
            request_id = %ctx.request_id,
            submission = submission_id,
            reviewer = %reviewer.id,
            decision = %decision,
            credited = outcome.credit.as_ref().is_some_and(|c| c.was_applied()),
            "Submission verified"
        );
        Ok(outcome.submission)
    }

    /// The submission if it is already closed by `reviewer_id` with `decision`
    async fn replayed(
        &self,
        submission_id: &str,
        reviewer_id: &str,
        decision: Decision,
    ) -> Result<Option<Submission>> {
        let current = self.store.get_submission(submission_id).await?;
        Ok(current.filter(|s| {
            s.status == decision.status() && s.verifier_id.as_deref() == Some(reviewer_id)
        }))
    }
}
