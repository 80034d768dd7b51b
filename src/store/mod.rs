//! Store of record
//!
//! `ImpactStore` is the seam between the workflow services and persistence.
//! Every method that touches more than one record is atomic: implementations
//! either apply all of it or none of it.
//!
//! Two implementations:
//! - [`MemoryStore`] - single-process, used in dev mode and tests
//! - [`MongoImpactStore`] - MongoDB with multi-document transactions

pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::auth::Role;
use crate::types::{
    CloseOutcome, Closure, CreditEntry, CreditOutcome, LinkOutcome, ProfileUpdate, Result,
    Submission, SubmissionFilter, Task, TaskUpdate, User,
};

pub use memory::MemoryStore;
pub use mongo::MongoImpactStore;

#[async_trait]
pub trait ImpactStore: Send + Sync {
    // ---------------------------------------------------------------- users

    /// Insert `user` unless a record with the same id exists; returns the
    /// stored record either way.
    async fn provision_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: &str) -> Result<Option<User>>;

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Option<User>>;

    async fn set_role(&self, id: &str, role: Role) -> Result<Option<User>>;

    // ---------------------------------------------------------------- tasks

    /// Fails with `Conflict` if the id is taken
    async fn insert_task(&self, task: Task) -> Result<Task>;

    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Fails with `Conflict` when `update.score` differs from the stored
    /// score and any submission references the task.
    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task>;

    /// Remove a task and clear it as anyone's current task. `NotFound` if
    /// absent, `Conflict` if any submission references it.
    async fn delete_task(&self, id: &str) -> Result<()>;

    // ---------------------------------------------------------- submissions

    /// Fails with `NotFound` if the task is gone and with `Conflict` if the
    /// student already has a pending or approved submission for it.
    async fn insert_submission(&self, submission: Submission) -> Result<Submission>;

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>>;

    /// Matching submissions ordered by creation time, oldest first
    async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>>;

    /// Move a pending submission to its terminal state and, when `credit` is
    /// given, apply it through the ledger in the same atomic unit.
    ///
    /// `NotFound` if the submission does not exist, `Conflict` if it is not
    /// pending. On either error nothing is written.
    async fn close_submission(
        &self,
        id: &str,
        closure: Closure,
        credit: Option<CreditEntry>,
    ) -> Result<CloseOutcome>;

    // --------------------------------------------------------------- ledger

    /// Apply a credit unless its key is already recorded
    async fn apply_credit(&self, entry: CreditEntry) -> Result<CreditOutcome>;

    async fn credits_for(&self, user_id: &str) -> Result<Vec<CreditEntry>>;

    // ------------------------------------------------------------ companion

    /// Set `current_task_id` on the user and return the updated record
    async fn set_current_task(&self, user_id: &str, task_id: &str) -> Result<User>;

    /// Some unpaired user on `task_id` other than `exclude`
    async fn find_match_candidate(&self, task_id: &str, exclude: &str) -> Result<Option<User>>;

    /// Link `a` and `b` if both are unpaired and `b` is still on `task_id`
    async fn link_companions(&self, a: &str, b: &str, task_id: &str) -> Result<LinkOutcome>;

    /// Clear both sides of `user_id`'s pairing; returns the former companion
    async fn unlink_companion(&self, user_id: &str) -> Result<Option<String>>;

    // ---------------------------------------------------------- leaderboard

    /// Users in leaderboard order
    async fn top_users(&self, limit: usize) -> Result<Vec<User>>;

    /// Number of users ranked ahead of `user`, counting at most `cap`
    async fn count_ranked_ahead(&self, user: &User, cap: u64) -> Result<u64>;
}
