//! Submission document schema
//!
//! `open_slot` is set to `<student>:<task>` while a submission is pending or
//! approved and removed on rejection. A unique partial index on it keeps at
//! most one open submission per student and task.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{ImpactError, ProofLinks, Submission, SubmissionStatus};

/// Collection name for submissions
pub const SUBMISSION_COLLECTION: &str = "submissions";

/// Submission document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SubmissionDoc {
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub student_id: String,

    pub task_id: String,

    /// pending | approved | rejected
    pub status: String,

    #[serde(default)]
    pub links: ProofLinks,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_slot: Option<String>,
}

/// Uniqueness key for open submissions
pub fn open_slot(student_id: &str, task_id: &str) -> String {
    format!("{student_id}:{task_id}")
}

impl From<Submission> for SubmissionDoc {
    fn from(sub: Submission) -> Self {
        let open = match sub.status {
            SubmissionStatus::Pending | SubmissionStatus::Approved => {
                Some(open_slot(&sub.student_id, &sub.task_id))
            }
            SubmissionStatus::Rejected => None,
        };
        Self {
            _id: sub.id,
            metadata: Metadata::from_chrono(sub.created_at, sub.created_at),
            student_id: sub.student_id,
            task_id: sub.task_id,
            status: sub.status.as_str().to_string(),
            links: sub.links,
            feedback: sub.feedback,
            verified_at: sub.verified_at.map(DateTime::from_chrono),
            verifier_id: sub.verifier_id,
            open_slot: open,
        }
    }
}

impl TryFrom<SubmissionDoc> for Submission {
    type Error = ImpactError;

    fn try_from(doc: SubmissionDoc) -> Result<Self, Self::Error> {
        Ok(Submission {
            status: doc.status.parse()?,
            created_at: doc.metadata.created(),
            id: doc._id,
            student_id: doc.student_id,
            task_id: doc.task_id,
            links: doc.links,
            feedback: doc.feedback,
            verified_at: doc.verified_at.map(|t| t.to_chrono()),
            verifier_id: doc.verifier_id,
        })
    }
}

impl IntoIndexes for SubmissionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "open_slot": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "open_slot": { "$exists": true } })
                        .name("open_slot_unique".to_string())
                        .build(),
                ),
            ),
            // Review queue
            (
                doc! { "status": 1, "metadata.created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "student_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("student_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "task_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("task_id_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for SubmissionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
