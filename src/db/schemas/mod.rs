//! Database schemas for impact-core
//!
//! Defines MongoDB document structures for users, tasks, submissions and
//! credits.

mod credit;
mod metadata;
mod submission;
mod task;
mod user;

pub use credit::{CreditDoc, CREDIT_COLLECTION};
pub use metadata::Metadata;
pub use submission::{open_slot, SubmissionDoc, SUBMISSION_COLLECTION};
pub use task::{TaskDoc, TASK_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
