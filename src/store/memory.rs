//! In-memory store
//!
//! All state sits behind one `RwLock`, so every write method is a single
//! critical section and therefore atomic. Used in dev mode and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::ImpactStore;
use crate::auth::Role;
use crate::types::{
    CloseOutcome, Closure, CreditEntry, CreditOutcome, ImpactError, LinkOutcome, ProfileUpdate,
    Result, Submission, SubmissionFilter, SubmissionStatus, Task, TaskUpdate, User,
};

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    tasks: HashMap<String, Task>,
    submissions: HashMap<String, Submission>,
    credits: HashMap<String, CreditEntry>,
}

/// Where an injected failure strikes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Fail before anything is written
    BeforeWrite,
    /// Apply the write, then report a transient error (lost acknowledgement)
    AfterWrite,
}

/// Single-process implementation of [`ImpactStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    pending_failures: AtomicU32,
    failure_point: std::sync::Mutex<Option<FailurePoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` atomic writes (close, credit, link) fail with a
    /// transient error at `point`. Exercises the retry and replay paths.
    pub fn inject_transient_failures(&self, count: u32, point: FailurePoint) {
        if let Ok(mut p) = self.failure_point.lock() {
            *p = Some(point);
        }
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Insert or replace a user verbatim, keeping its timestamps
    pub async fn put_user(&self, user: User) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    fn take_failure(&self) -> Option<FailurePoint> {
        let taken = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !taken {
            return None;
        }
        self.failure_point.lock().ok().and_then(|p| *p)
    }
}

fn injected() -> ImpactError {
    ImpactError::Transient("injected store failure".into())
}

/// Validate and apply a credit. Nothing is mutated when an error is returned.
fn apply_credit_locked(state: &mut MemoryState, entry: CreditEntry) -> Result<CreditOutcome> {
    if state.credits.contains_key(&entry.key) {
        debug!(key = %entry.key, "Credit already applied");
        return Ok(CreditOutcome::AlreadyApplied);
    }

    let user = state
        .users
        .get_mut(&entry.user_id)
        .ok_or_else(|| ImpactError::NotFound("User".into()))?;

    let new_score = i64::try_from(user.impact_score)
        .ok()
        .and_then(|score| score.checked_add(entry.amount))
        .ok_or_else(|| ImpactError::Validation("Score would overflow".into()))?;
    if new_score < 0 {
        return Err(ImpactError::Validation(
            "Correction would make the score negative".into(),
        ));
    }

    user.impact_score = new_score as u64;
    if entry.completes_task() {
        user.tasks_completed += 1;
    }
    user.updated_at = Utc::now();
    let updated = user.clone();

    state.credits.insert(entry.key.clone(), entry);
    Ok(CreditOutcome::Applied(updated))
}

#[async_trait]
impl ImpactStore for MemoryStore {
    async fn provision_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        let stored = state.users.entry(user.id.clone()).or_insert(user);
        Ok(stored.clone())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = &update.display_name {
            user.display_name = name.clone();
        }
        if let Some(dept) = &update.dept {
            user.dept = Some(dept.clone());
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn set_role(&self, id: &str, role: Role) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(id).map(|user| {
            user.role = role;
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn insert_task(&self, task: Task) -> Result<Task> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(ImpactError::Conflict(format!(
                "Task '{}' already exists",
                task.id
            )));
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        let mut state = self.state.write().await;
        let referenced = state.submissions.values().any(|s| s.task_id == id);

        let task = state
            .tasks
            .get_mut(id)
            .ok_or_else(|| ImpactError::NotFound("Task".into()))?;

        if let Some(score) = update.score {
            if score != task.score && referenced {
                return Err(ImpactError::Conflict(
                    "Task score cannot change once work has been submitted".into(),
                ));
            }
        }

        if let Some(title) = &update.title {
            task.title = title.clone();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        if let Some(category) = &update.category {
            task.category = category.clone();
        }
        if let Some(difficulty) = update.difficulty {
            task.difficulty = difficulty;
        }
        if let Some(score) = update.score {
            task.score = score;
        }
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(id) {
            return Err(ImpactError::NotFound("Task".into()));
        }
        if state.submissions.values().any(|s| s.task_id == id) {
            return Err(ImpactError::Conflict(
                "Task has submissions and cannot be deleted".into(),
            ));
        }

        state.tasks.remove(id);
        let now = Utc::now();
        for user in state.users.values_mut() {
            if user.current_task_id.as_deref() == Some(id) {
                user.current_task_id = None;
                user.updated_at = now;
            }
        }
        Ok(())
    }

    async fn insert_submission(&self, submission: Submission) -> Result<Submission> {
        let mut state = self.state.write().await;
        if !state.tasks.contains_key(&submission.task_id) {
            return Err(ImpactError::NotFound("Task".into()));
        }
        let duplicate = state.submissions.values().any(|s| {
            s.student_id == submission.student_id
                && s.task_id == submission.task_id
                && s.status != SubmissionStatus::Rejected
        });
        if duplicate {
            return Err(ImpactError::Conflict(
                "You already have an open or approved submission for this task".into(),
            ));
        }
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        Ok(self.state.read().await.submissions.get(id).cloned())
    }

    async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        let state = self.state.read().await;
        let mut found: Vec<Submission> = state
            .submissions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn close_submission(
        &self,
        id: &str,
        closure: Closure,
        credit: Option<CreditEntry>,
    ) -> Result<CloseOutcome> {
        let failure = self.take_failure();
        if failure == Some(FailurePoint::BeforeWrite) {
            return Err(injected());
        }

        let mut state = self.state.write().await;

        let current = state
            .submissions
            .get(id)
            .ok_or_else(|| ImpactError::NotFound("Submission".into()))?;
        if current.status.is_terminal() {
            return Err(ImpactError::Conflict("Submission already processed".into()));
        }
        if let Some(entry) = &credit {
            if !state.users.contains_key(&entry.user_id) {
                return Err(ImpactError::NotFound("User".into()));
            }
        }

        // Preconditions hold; the credit below can only short-circuit on a
        // recorded key, which leaves the user untouched.
        let credit = match credit {
            Some(entry) => Some(apply_credit_locked(&mut state, entry)?),
            None => None,
        };

        let submission = state
            .submissions
            .get_mut(id)
            .ok_or_else(|| ImpactError::NotFound("Submission".into()))?;
        submission.status = closure.status;
        submission.feedback = closure.feedback;
        submission.verified_at = Some(closure.verified_at);
        submission.verifier_id = Some(closure.verifier_id);
        let submission = submission.clone();

        if failure == Some(FailurePoint::AfterWrite) {
            return Err(injected());
        }
        Ok(CloseOutcome { submission, credit })
    }

    async fn apply_credit(&self, entry: CreditEntry) -> Result<CreditOutcome> {
        let failure = self.take_failure();
        if failure == Some(FailurePoint::BeforeWrite) {
            return Err(injected());
        }
        let outcome = apply_credit_locked(&mut *self.state.write().await, entry)?;
        if failure == Some(FailurePoint::AfterWrite) {
            return Err(injected());
        }
        Ok(outcome)
    }

    async fn credits_for(&self, user_id: &str) -> Result<Vec<CreditEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<CreditEntry> = state
            .credits
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.applied_at.cmp(&b.applied_at));
        Ok(entries)
    }

    async fn set_current_task(&self, user_id: &str, task_id: &str) -> Result<User> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;
        if user.current_task_id.as_deref() != Some(task_id) {
            user.current_task_id = Some(task_id.to_string());
            user.updated_at = Utc::now();
        }
        Ok(user.clone())
    }

    async fn find_match_candidate(&self, task_id: &str, exclude: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        let mut candidates: Vec<&User> = state
            .users
            .values()
            .filter(|u| {
                u.id != exclude
                    && u.companion_id.is_none()
                    && u.current_task_id.as_deref() == Some(task_id)
            })
            .collect();
        // Longest-waiting first
        candidates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates.first().map(|u| (*u).clone()))
    }

    async fn link_companions(&self, a: &str, b: &str, task_id: &str) -> Result<LinkOutcome> {
        if a == b {
            return Err(ImpactError::Validation("Cannot pair a user with themselves".into()));
        }
        let failure = self.take_failure();
        if failure == Some(FailurePoint::BeforeWrite) {
            return Err(injected());
        }

        let mut state = self.state.write().await;
        let a_free = match state.users.get(a) {
            Some(u) => u.companion_id.is_none(),
            None => return Err(ImpactError::NotFound("User".into())),
        };
        let b_free = match state.users.get(b) {
            Some(u) => u.companion_id.is_none() && u.current_task_id.as_deref() == Some(task_id),
            None => return Err(ImpactError::NotFound("User".into())),
        };
        if !(a_free && b_free) {
            return Ok(LinkOutcome::Claimed);
        }

        let now = Utc::now();
        for (me, other) in [(a, b), (b, a)] {
            if let Some(user) = state.users.get_mut(me) {
                user.companion_id = Some(other.to_string());
                user.updated_at = now;
            }
        }

        if failure == Some(FailurePoint::AfterWrite) {
            return Err(injected());
        }
        Ok(LinkOutcome::Linked)
    }

    async fn unlink_companion(&self, user_id: &str) -> Result<Option<String>> {
        let mut state = self.state.write().await;
        let former = state
            .users
            .get(user_id)
            .ok_or_else(|| ImpactError::NotFound("User".into()))?
            .companion_id
            .clone();

        let Some(former) = former else {
            return Ok(None);
        };

        let now = Utc::now();
        if let Some(user) = state.users.get_mut(user_id) {
            user.companion_id = None;
            user.updated_at = now;
        }
        if let Some(other) = state.users.get_mut(&former) {
            if other.companion_id.as_deref() == Some(user_id) {
                other.companion_id = None;
                other.updated_at = now;
            }
        }
        Ok(Some(former))
    }

    async fn top_users(&self, limit: usize) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| {
            (std::cmp::Reverse(a.impact_score), a.created_at, &a.id).cmp(&(
                std::cmp::Reverse(b.impact_score),
                b.created_at,
                &b.id,
            ))
        });
        users.truncate(limit);
        Ok(users)
    }

    async fn count_ranked_ahead(&self, user: &User, cap: u64) -> Result<u64> {
        let state = self.state.read().await;
        let ahead = state
            .users
            .values()
            .filter(|other| other.is_ranked_ahead_of(user))
            .take(cap as usize)
            .count();
        Ok(ahead as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreditKind, Difficulty, ProofLinks};

    fn student(id: &str) -> User {
        User::provisioned(id.into(), id.into(), Role::Student)
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            title: format!("Task {id}"),
            description: String::new(),
            category: "General".into(),
            difficulty: Difficulty::Easy,
            score: 10,
            created_at: Utc::now(),
        }
    }

    fn approval(key: &str, user: &str, amount: i64) -> CreditEntry {
        CreditEntry {
            key: key.into(),
            user_id: user.into(),
            amount,
            kind: CreditKind::Approval,
            submission_id: Some(key.into()),
            task_id: Some("t1".into()),
            applied_by: "mentor@x.io".into(),
            reason: None,
            applied_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_provision_is_insert_if_absent() {
        let store = MemoryStore::new();
        let first = store.provision_user(student("u1@x.io")).await.unwrap();

        let mut impostor = student("u1@x.io");
        impostor.role = Role::Admin;
        let second = store.provision_user(impostor).await.unwrap();

        assert_eq!(second.role, Role::Student);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_credit_key_applied_once() {
        let store = MemoryStore::new();
        store.provision_user(student("u1@x.io")).await.unwrap();

        let first = store.apply_credit(approval("s1", "u1@x.io", 500)).await.unwrap();
        let second = store.apply_credit(approval("s1", "u1@x.io", 500)).await.unwrap();

        assert!(first.was_applied());
        assert_eq!(second, CreditOutcome::AlreadyApplied);
        let user = store.get_user("u1@x.io").await.unwrap().unwrap();
        assert_eq!(user.impact_score, 500);
        assert_eq!(user.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_close_rejects_second_transition() {
        let store = MemoryStore::new();
        store.provision_user(student("u1@x.io")).await.unwrap();
        store.insert_task(task("t1")).await.unwrap();
        let sub = store
            .insert_submission(Submission::pending(
                "u1@x.io".into(),
                "t1".into(),
                ProofLinks::default(),
            ))
            .await
            .unwrap();

        let closure = Closure {
            status: SubmissionStatus::Approved,
            feedback: None,
            verified_at: Utc::now(),
            verifier_id: "mentor@x.io".into(),
        };
        store
            .close_submission(&sub.id, closure.clone(), Some(approval(&sub.id, "u1@x.io", 10)))
            .await
            .unwrap();

        let again = store
            .close_submission(&sub.id, closure, Some(approval(&sub.id, "u1@x.io", 10)))
            .await;
        assert!(matches!(again, Err(ImpactError::Conflict(_))));

        let user = store.get_user("u1@x.io").await.unwrap().unwrap();
        assert_eq!(user.impact_score, 10);
    }

    #[tokio::test]
    async fn test_link_refuses_already_paired() {
        let store = MemoryStore::new();
        for id in ["a@x.io", "b@x.io", "c@x.io"] {
            store.provision_user(student(id)).await.unwrap();
            store.set_current_task(id, "t2").await.unwrap();
        }

        assert_eq!(
            store.link_companions("a@x.io", "b@x.io", "t2").await.unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            store.link_companions("c@x.io", "b@x.io", "t2").await.unwrap(),
            LinkOutcome::Claimed
        );

        let c = store.get_user("c@x.io").await.unwrap().unwrap();
        assert_eq!(c.companion_id, None);
    }

    #[tokio::test]
    async fn test_unlink_clears_both_sides() {
        let store = MemoryStore::new();
        for id in ["a@x.io", "b@x.io"] {
            store.provision_user(student(id)).await.unwrap();
            store.set_current_task(id, "t2").await.unwrap();
        }
        store.link_companions("a@x.io", "b@x.io", "t2").await.unwrap();

        let former = store.unlink_companion("b@x.io").await.unwrap();
        assert_eq!(former.as_deref(), Some("a@x.io"));
        for id in ["a@x.io", "b@x.io"] {
            assert_eq!(store.get_user(id).await.unwrap().unwrap().companion_id, None);
        }
    }

    #[tokio::test]
    async fn test_injected_failure_before_write_changes_nothing() {
        let store = MemoryStore::new();
        store.provision_user(student("u1@x.io")).await.unwrap();
        store.inject_transient_failures(1, FailurePoint::BeforeWrite);

        let result = store.apply_credit(approval("s9", "u1@x.io", 5)).await;
        assert!(matches!(result, Err(ImpactError::Transient(_))));
        assert_eq!(store.get_user("u1@x.io").await.unwrap().unwrap().impact_score, 0);

        // Only one failure was armed
        assert!(store.apply_credit(approval("s9", "u1@x.io", 5)).await.is_ok());
    }
}
