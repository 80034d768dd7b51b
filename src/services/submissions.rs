//! Submission intake and review queue

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::auth::{authorize, RequestContext, REVIEWERS, STUDENTS};
use crate::services::retry::RetryPolicy;
use crate::store::ImpactStore;
use crate::types::{
    ImpactError, ProofLinks, Result, Submission, SubmissionFilter, SubmissionStatus,
};

/// Body of `POST /submissions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubmission {
    pub task_id: String,
    #[serde(default)]
    pub links: ProofLinks,
}

/// Every supplied link must be an absolute http(s) URL, and there must be one
pub fn validate_links(links: &ProofLinks) -> Result<ProofLinks> {
    let links = links.normalized();
    let mut supplied = 0;

    for (name, link) in links.iter() {
        let parsed = Url::parse(link)
            .map_err(|_| ImpactError::Validation(format!("The {name} link is not a valid URL")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ImpactError::Validation(format!(
                "The {name} link must be an http or https address"
            )));
        }
        supplied += 1;
    }

    if supplied == 0 {
        return Err(ImpactError::Validation(
            "Attach at least one proof-of-work link".into(),
        ));
    }
    Ok(links)
}

pub struct SubmissionDesk {
    store: Arc<dyn ImpactStore>,
    retry: RetryPolicy,
}

impl SubmissionDesk {
    pub fn new(store: Arc<dyn ImpactStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Create a pending submission for the calling student
    pub async fn create(&self, ctx: &RequestContext, request: NewSubmission) -> Result<Submission> {
        authorize(&ctx.principal, STUDENTS)?;

        let links = validate_links(&request.links)?;
        let task_id = request.task_id.trim();
        self.retry
            .run("get_task", |_| self.store.get_task(task_id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Task".into()))?;

        let submission = Submission::pending(ctx.principal.id.clone(), task_id.to_string(), links);
        let created = self
            .retry
            .run("insert_submission", |_| {
                self.store.insert_submission(submission.clone())
            })
            .await;

        // A retried insert that already landed reports a duplicate
        let created = match created {
            Err(ImpactError::Conflict(msg)) => self
                .store
                .get_submission(&submission.id)
                .await?
                .ok_or(ImpactError::Conflict(msg))?,
            other => other?,
        };

        info!(
            request_id = %ctx.request_id,
            submission = %created.id,
            student = %created.student_id,
            task = %created.task_id,
            "Submission created"
        );
        Ok(created)
    }

    /// Review queue, oldest first
    pub async fn pending(&self, ctx: &RequestContext) -> Result<Vec<Submission>> {
        authorize(&ctx.principal, REVIEWERS)?;

        let filter = SubmissionFilter {
            status: Some(SubmissionStatus::Pending),
            ..Default::default()
        };
        self.retry
            .run("list_submissions", |_| self.store.list_submissions(&filter))
            .await
    }

    /// Visible to the owning student and to reviewers
    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Submission> {
        let submission = self
            .retry
            .run("get_submission", |_| self.store.get_submission(id))
            .await?
            .ok_or_else(|| ImpactError::NotFound("Submission".into()))?;

        if submission.student_id != ctx.principal.id {
            authorize(&ctx.principal, REVIEWERS)?;
        }
        Ok(submission)
    }

    /// The caller's submissions, newest first
    pub async fn mine(&self, ctx: &RequestContext) -> Result<Vec<Submission>> {
        let filter = SubmissionFilter {
            student_id: Some(ctx.principal.id.clone()),
            ..Default::default()
        };
        let mut found = self
            .retry
            .run("list_submissions", |_| self.store.list_submissions(&filter))
            .await?;
        found.reverse();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::store::MemoryStore;
    use crate::types::{Difficulty, Task, User};
    use chrono::Utc;

    async fn setup() -> (Arc<MemoryStore>, SubmissionDesk) {
        let store = Arc::new(MemoryStore::new());
        for (id, role) in [
            ("mentor@x.io", Role::Mentor),
            ("u1@x.io", Role::Student),
            ("u2@x.io", Role::Student),
        ] {
            store
                .provision_user(User::provisioned(id.into(), id.into(), role))
                .await
                .unwrap();
        }
        store
            .insert_task(Task {
                id: "T1".into(),
                title: "Tutor a peer".into(),
                description: String::new(),
                category: "Education".into(),
                difficulty: Difficulty::Easy,
                score: 50,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let desk = SubmissionDesk::new(store.clone(), RetryPolicy::immediate(3));
        (store, desk)
    }

    async fn ctx(store: &MemoryStore, id: &str) -> RequestContext {
        RequestContext::new(store.get_user(id).await.unwrap().unwrap())
    }

    fn request(link: &str) -> NewSubmission {
        NewSubmission {
            task_id: "T1".into(),
            links: ProofLinks {
                drive: Some(link.into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_link_validation() {
        assert!(validate_links(&ProofLinks::default()).is_err());
        assert!(validate_links(&ProofLinks {
            other: Some("javascript:alert(1)".into()),
            ..Default::default()
        })
        .is_err());
        assert!(validate_links(&ProofLinks {
            screenshot: Some("not a url".into()),
            ..Default::default()
        })
        .is_err());

        let ok = validate_links(&ProofLinks {
            drive: Some(" https://drive.example/abc ".into()),
            other: Some("".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(ok.drive.as_deref(), Some("https://drive.example/abc"));
        assert_eq!(ok.other, None);
    }

    #[tokio::test]
    async fn test_student_creates_pending() {
        let (store, desk) = setup().await;
        let sub = desk
            .create(&ctx(&store, "u1@x.io").await, request("https://drive.example/1"))
            .await
            .unwrap();
        assert_eq!(sub.status, SubmissionStatus::Pending);
        assert_eq!(sub.student_id, "u1@x.io");
    }

    #[tokio::test]
    async fn test_duplicate_open_submission_conflicts() {
        let (store, desk) = setup().await;
        let me = ctx(&store, "u1@x.io").await;
        desk.create(&me, request("https://drive.example/1")).await.unwrap();

        let again = desk.create(&me, request("https://drive.example/2")).await;
        assert!(matches!(again, Err(ImpactError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reviewers_cannot_submit() {
        let (store, desk) = setup().await;
        let result = desk
            .create(&ctx(&store, "mentor@x.io").await, request("https://drive.example/1"))
            .await;
        assert_eq!(result.unwrap_err(), ImpactError::AuthorizationDenied);
    }

    #[tokio::test]
    async fn test_visibility() {
        let (store, desk) = setup().await;
        let sub = desk
            .create(&ctx(&store, "u1@x.io").await, request("https://drive.example/1"))
            .await
            .unwrap();

        assert!(desk.get(&ctx(&store, "u1@x.io").await, &sub.id).await.is_ok());
        assert!(desk.get(&ctx(&store, "mentor@x.io").await, &sub.id).await.is_ok());
        assert_eq!(
            desk.get(&ctx(&store, "u2@x.io").await, &sub.id).await.unwrap_err(),
            ImpactError::AuthorizationDenied
        );

        assert_eq!(desk.pending(&ctx(&store, "mentor@x.io").await).await.unwrap().len(), 1);
        assert!(desk.pending(&ctx(&store, "u1@x.io").await).await.is_err());
        assert_eq!(desk.mine(&ctx(&store, "u2@x.io").await).await.unwrap().len(), 0);
    }
}
