//! Task document schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{Difficulty, ImpactError, Task};

/// Collection name for tasks
pub const TASK_COLLECTION: &str = "tasks";

/// Catalog entry stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskDoc {
    pub _id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    /// easy | medium | hard
    pub difficulty: String,

    /// Reward credited on approval
    pub score: i64,
}

impl TryFrom<Task> for TaskDoc {
    type Error = ImpactError;

    fn try_from(task: Task) -> Result<Self, Self::Error> {
        let score = i64::try_from(task.score)
            .map_err(|_| ImpactError::Validation("Task score is too large".into()))?;
        Ok(Self {
            _id: task.id,
            metadata: Metadata::from_chrono(task.created_at, task.created_at),
            title: task.title,
            description: task.description,
            category: task.category,
            difficulty: task.difficulty.to_string(),
            score,
        })
    }
}

impl TryFrom<TaskDoc> for Task {
    type Error = ImpactError;

    fn try_from(doc: TaskDoc) -> Result<Self, Self::Error> {
        let difficulty: Difficulty = doc.difficulty.parse().map_err(|_| {
            ImpactError::Internal(format!("stored difficulty '{}' is invalid", doc.difficulty))
        })?;
        Ok(Task {
            created_at: doc.metadata.created(),
            id: doc._id,
            title: doc.title,
            description: doc.description,
            category: doc.category,
            difficulty,
            score: doc.score.max(0) as u64,
        })
    }
}

impl IntoIndexes for TaskDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "metadata.created_at": 1, "_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("catalog_order".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for TaskDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
