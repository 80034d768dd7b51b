//! User document schema
//!
//! One document per participant, keyed by the verified email.

use bson::{doc, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;
use crate::types::{ImpactError, User};

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    /// Identity key (lower-cased verified email)
    pub _id: String,

    /// Common metadata (created_at, updated_at)
    #[serde(default)]
    pub metadata: Metadata,

    pub display_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dept: Option<String>,

    /// Stored as the lowercase role name
    pub role: String,

    #[serde(default)]
    pub impact_score: i64,

    #[serde(default)]
    pub tasks_completed: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,

    /// Absent while unpaired; queries use `companion_id: null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub companion_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentor_id: Option<String>,
}

impl From<User> for UserDoc {
    fn from(user: User) -> Self {
        Self {
            _id: user.id,
            metadata: Metadata::from_chrono(user.created_at, user.updated_at),
            display_name: user.display_name,
            dept: user.dept,
            role: user.role.as_str().to_string(),
            impact_score: user.impact_score as i64,
            tasks_completed: user.tasks_completed as i64,
            current_task_id: user.current_task_id,
            companion_id: user.companion_id,
            mentor_id: user.mentor_id,
        }
    }
}

impl TryFrom<UserDoc> for User {
    type Error = ImpactError;

    fn try_from(doc: UserDoc) -> Result<Self, Self::Error> {
        let role: Role = doc
            .role
            .parse()
            .map_err(|_| ImpactError::Internal(format!("stored role '{}' is invalid", doc.role)))?;
        Ok(User {
            created_at: doc.metadata.created(),
            updated_at: doc.metadata.updated(),
            id: doc._id,
            display_name: doc.display_name,
            dept: doc.dept,
            role,
            impact_score: doc.impact_score.max(0) as u64,
            tasks_completed: doc.tasks_completed.max(0) as u64,
            current_task_id: doc.current_task_id,
            companion_id: doc.companion_id,
            mentor_id: doc.mentor_id,
        })
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Leaderboard order
            (
                doc! { "impact_score": -1, "metadata.created_at": 1, "_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("leaderboard_order".to_string())
                        .build(),
                ),
            ),
            // Matchmaking lookups
            (
                doc! { "current_task_id": 1, "companion_id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("current_task_companion_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_keeps_role_and_score() {
        let mut user = User::provisioned("a@x.io".into(), "A".into(), Role::Mentor);
        user.impact_score = 1200;
        user.companion_id = Some("b@x.io".into());

        let back = User::try_from(UserDoc::from(user.clone())).unwrap();
        assert_eq!(back.role, Role::Mentor);
        assert_eq!(back.impact_score, 1200);
        assert_eq!(back.companion_id.as_deref(), Some("b@x.io"));
        assert_eq!(
            back.created_at.timestamp_millis(),
            user.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_unknown_role_is_internal() {
        let doc = UserDoc {
            _id: "a@x.io".into(),
            role: "superuser".into(),
            ..Default::default()
        };
        assert!(matches!(User::try_from(doc), Err(ImpactError::Internal(_))));
    }

    #[test]
    fn test_unpaired_omits_companion_field() {
        let user = User::provisioned("a@x.io".into(), "A".into(), Role::Student);
        let doc = bson::to_document(&UserDoc::from(user)).unwrap();
        assert!(!doc.contains_key("companion_id"));
    }
}
