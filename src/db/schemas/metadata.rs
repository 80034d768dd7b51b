//! Common metadata for all documents
//!
//! Tracks creation and update timestamps.

use bson::DateTime;
use chrono::{DateTime as ChronoDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Common metadata for all documents
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    /// When the document was last updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    /// When the document was created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

impl Metadata {
    /// Create new metadata with current timestamp
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            updated_at: Some(now),
            created_at: Some(now),
        }
    }

    /// Metadata carrying timestamps from a domain record
    pub fn from_chrono(created_at: ChronoDateTime<Utc>, updated_at: ChronoDateTime<Utc>) -> Self {
        Self {
            updated_at: Some(DateTime::from_chrono(updated_at)),
            created_at: Some(DateTime::from_chrono(created_at)),
        }
    }

    pub fn created(&self) -> ChronoDateTime<Utc> {
        self.created_at.unwrap_or(DateTime::MIN).to_chrono()
    }

    pub fn updated(&self) -> ChronoDateTime<Utc> {
        self.updated_at
            .or(self.created_at)
            .unwrap_or(DateTime::MIN)
            .to_chrono()
    }
}
