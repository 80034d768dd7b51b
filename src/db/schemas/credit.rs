//! Credit document schema
//!
//! The credited-submissions index. `_id` is the idempotency key, so a key can
//! be recorded only once.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{CreditEntry, CreditKind, ImpactError};

/// Collection name for credits
pub const CREDIT_COLLECTION: &str = "credits";

/// Applied score mutation stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CreditDoc {
    /// Idempotency key
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,

    pub amount: i64,

    /// approval | correction
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    pub applied_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub applied_at: DateTime,
}

// bson::DateTime has no Default
impl Default for CreditDoc {
    fn default() -> Self {
        Self {
            _id: String::new(),
            metadata: Metadata::default(),
            user_id: String::new(),
            amount: 0,
            kind: CreditKind::Approval.as_str().to_string(),
            submission_id: None,
            task_id: None,
            applied_by: String::new(),
            reason: None,
            applied_at: DateTime::from_millis(0),
        }
    }
}

impl From<CreditEntry> for CreditDoc {
    fn from(entry: CreditEntry) -> Self {
        Self {
            _id: entry.key,
            metadata: Metadata::from_chrono(entry.applied_at, entry.applied_at),
            user_id: entry.user_id,
            amount: entry.amount,
            kind: entry.kind.as_str().to_string(),
            submission_id: entry.submission_id,
            task_id: entry.task_id,
            applied_by: entry.applied_by,
            reason: entry.reason,
            applied_at: DateTime::from_chrono(entry.applied_at),
        }
    }
}

impl TryFrom<CreditDoc> for CreditEntry {
    type Error = ImpactError;

    fn try_from(doc: CreditDoc) -> Result<Self, Self::Error> {
        let kind = match doc.kind.as_str() {
            "approval" => CreditKind::Approval,
            "correction" => CreditKind::Correction,
            other => {
                return Err(ImpactError::Internal(format!(
                    "stored credit kind '{other}' is invalid"
                )))
            }
        };
        Ok(CreditEntry {
            key: doc._id,
            user_id: doc.user_id,
            amount: doc.amount,
            kind,
            submission_id: doc.submission_id,
            task_id: doc.task_id,
            applied_by: doc.applied_by,
            reason: doc.reason,
            applied_at: doc.applied_at.to_chrono(),
        })
    }
}

impl IntoIndexes for CreditDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "user_id": 1, "applied_at": 1 },
            Some(
                IndexOptions::builder()
                    .name("user_applied_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for CreditDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
