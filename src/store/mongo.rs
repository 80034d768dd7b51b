//! MongoDB store
//!
//! Multi-record operations run in a transaction, so the deployment must be a
//! replica set. Single-record state transitions carry their precondition in
//! the update filter (`status: "pending"`, `companion_id: null`).

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use mongodb::options::ReturnDocument;
use mongodb::ClientSession;
use tracing::{debug, info};

use super::ImpactStore;
use crate::auth::Role;
use crate::db::schemas::{
    CreditDoc, SubmissionDoc, TaskDoc, UserDoc, CREDIT_COLLECTION, SUBMISSION_COLLECTION,
    TASK_COLLECTION, USER_COLLECTION,
};
use crate::db::{is_duplicate_key, MongoClient, MongoCollection};
use crate::types::{
    CloseOutcome, Closure, CreditEntry, CreditOutcome, ImpactError, LinkOutcome, ProfileUpdate,
    Result, Submission, SubmissionFilter, SubmissionStatus, Task, TaskUpdate, User,
};

fn to_document<T: serde::Serialize>(value: &T) -> Result<Document> {
    bson::to_document(value).map_err(|e| ImpactError::Internal(format!("BSON encode: {e}")))
}

fn users_from(docs: Vec<UserDoc>) -> Result<Vec<User>> {
    docs.into_iter().map(User::try_from).collect()
}

/// MongoDB implementation of [`ImpactStore`]
#[derive(Clone)]
pub struct MongoImpactStore {
    client: MongoClient,
    users: MongoCollection<UserDoc>,
    tasks: MongoCollection<TaskDoc>,
    submissions: MongoCollection<SubmissionDoc>,
    credits: MongoCollection<CreditDoc>,
}

impl MongoImpactStore {
    /// Open collections and apply their indexes
    pub async fn new(client: MongoClient) -> Result<Self> {
        let users = client.collection::<UserDoc>(USER_COLLECTION).await?;
        let tasks = client.collection::<TaskDoc>(TASK_COLLECTION).await?;
        let submissions = client
            .collection::<SubmissionDoc>(SUBMISSION_COLLECTION)
            .await?;
        let credits = client.collection::<CreditDoc>(CREDIT_COLLECTION).await?;

        info!(db = client.db_name(), "MongoDB store ready");

        Ok(Self {
            client,
            users,
            tasks,
            submissions,
            credits,
        })
    }

    /// Credit routine shared by `apply_credit` and `close_submission`
    async fn apply_credit_in(
        &self,
        session: &mut ClientSession,
        entry: CreditEntry,
    ) -> Result<CreditOutcome> {
        let recorded = self
            .credits
            .inner()
            .find_one(doc! { "_id": &entry.key })
            .session(&mut *session)
            .await?;
        if recorded.is_some() {
            debug!(key = %entry.key, "Credit already applied");
            return Ok(CreditOutcome::AlreadyApplied);
        }

        let mut filter = doc! { "_id": &entry.user_id };
        if entry.amount < 0 {
            filter.insert("impact_score", doc! { "$gte": -entry.amount });
        }
        let completed: i64 = if entry.completes_task() { 1 } else { 0 };

        let updated = self
            .users
            .inner()
            .find_one_and_update(
                filter,
                doc! {
                    "$inc": { "impact_score": entry.amount, "tasks_completed": completed },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        let Some(updated) = updated else {
            let exists = self
                .users
                .inner()
                .find_one(doc! { "_id": &entry.user_id })
                .session(&mut *session)
                .await?
                .is_some();
            return Err(if exists {
                ImpactError::Validation("Correction would make the score negative".into())
            } else {
                ImpactError::NotFound("User".into())
            });
        };

        self.credits
            .inner()
            .insert_one(CreditDoc::from(entry))
            .session(&mut *session)
            .await?;

        Ok(CreditOutcome::Applied(User::try_from(updated)?))
    }

    async fn close_in(
        &self,
        session: &mut ClientSession,
        id: &str,
        closure: Closure,
        credit: Option<CreditEntry>,
    ) -> Result<CloseOutcome> {
        let mut update = doc! {
            "$set": {
                "status": closure.status.as_str(),
                "verified_at": DateTime::from_chrono(closure.verified_at),
                "verifier_id": &closure.verifier_id,
                "metadata.updated_at": DateTime::now(),
            }
        };
        if let Some(feedback) = &closure.feedback {
            update
                .get_document_mut("$set")
                .map_err(|e| ImpactError::Internal(e.to_string()))?
                .insert("feedback", feedback);
        }
        if closure.status == SubmissionStatus::Rejected {
            update.insert("$unset", doc! { "open_slot": "" });
        }

        let closed = self
            .submissions
            .inner()
            .find_one_and_update(doc! { "_id": id, "status": "pending" }, update)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?;

        let Some(closed) = closed else {
            let exists = self
                .submissions
                .inner()
                .find_one(doc! { "_id": id })
                .session(&mut *session)
                .await?
                .is_some();
            return Err(if exists {
                ImpactError::Conflict("Submission already processed".into())
            } else {
                ImpactError::NotFound("Submission".into())
            });
        };

        let credit = match credit {
            Some(entry) => Some(self.apply_credit_in(session, entry).await?),
            None => None,
        };

        Ok(CloseOutcome {
            submission: Submission::try_from(closed)?,
            credit,
        })
    }

    async fn link_in(
        &self,
        session: &mut ClientSession,
        a: &str,
        b: &str,
        task_id: &str,
    ) -> Result<LinkOutcome> {
        let now = DateTime::now();

        for (me, other, extra) in [
            (a, b, None),
            (b, a, Some(task_id)),
        ] {
            let mut filter = doc! { "_id": me, "companion_id": null };
            if let Some(task_id) = extra {
                filter.insert("current_task_id", task_id);
            }
            let result = self
                .users
                .inner()
                .update_one(
                    filter,
                    doc! { "$set": { "companion_id": other, "metadata.updated_at": now } },
                )
                .session(&mut *session)
                .await?;

            if result.matched_count == 0 {
                let exists = self
                    .users
                    .inner()
                    .find_one(doc! { "_id": me })
                    .session(&mut *session)
                    .await?
                    .is_some();
                if !exists {
                    return Err(ImpactError::NotFound("User".into()));
                }
                return Ok(LinkOutcome::Claimed);
            }
        }

        Ok(LinkOutcome::Linked)
    }

    async fn unlink_in(&self, session: &mut ClientSession, user_id: &str) -> Result<Option<String>> {
        let user = self
            .users
            .inner()
            .find_one(doc! { "_id": user_id })
            .session(&mut *session)
            .await?
            .ok_or_else(|| ImpactError::NotFound("User".into()))?;

        let Some(former) = user.companion_id else {
            return Ok(None);
        };

        let now = DateTime::now();
        let clear = doc! {
            "$unset": { "companion_id": "" },
            "$set": { "metadata.updated_at": now },
        };
        self.users
            .inner()
            .update_one(doc! { "_id": user_id }, clear.clone())
            .session(&mut *session)
            .await?;
        self.users
            .inner()
            .update_one(doc! { "_id": &former, "companion_id": user_id }, clear)
            .session(&mut *session)
            .await?;

        Ok(Some(former))
    }

    async fn update_task_in(
        &self,
        session: &mut ClientSession,
        id: &str,
        update: &TaskUpdate,
    ) -> Result<Task> {
        let current = self
            .tasks
            .inner()
            .find_one(doc! { "_id": id })
            .session(&mut *session)
            .await?
            .ok_or_else(|| ImpactError::NotFound("Task".into()))?;

        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        if let Some(score) = update.score {
            let score = i64::try_from(score)
                .map_err(|_| ImpactError::Validation("Task score is too large".into()))?;
            if score != current.score {
                let referenced = self
                    .submissions
                    .inner()
                    .count_documents(doc! { "task_id": id })
                    .limit(1)
                    .session(&mut *session)
                    .await?;
                if referenced > 0 {
                    return Err(ImpactError::Conflict(
                        "Task score cannot change once work has been submitted".into(),
                    ));
                }
            }
            set.insert("score", score);
        }
        if let Some(title) = &update.title {
            set.insert("title", title);
        }
        if let Some(description) = &update.description {
            set.insert("description", description);
        }
        if let Some(category) = &update.category {
            set.insert("category", category);
        }
        if let Some(difficulty) = update.difficulty {
            set.insert("difficulty", difficulty.to_string());
        }

        let updated = self
            .tasks
            .inner()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await?
            .ok_or_else(|| ImpactError::NotFound("Task".into()))?;

        Task::try_from(updated)
    }

    /// Touching the task makes a concurrent delete or score edit conflict
    /// with this transaction.
    async fn insert_submission_in(
        &self,
        session: &mut ClientSession,
        submission: Submission,
    ) -> Result<Submission> {
        let touched = self
            .tasks
            .inner()
            .update_one(
                doc! { "_id": &submission.task_id },
                doc! { "$set": { "metadata.updated_at": DateTime::now() } },
            )
            .session(&mut *session)
            .await?;
        if touched.matched_count == 0 {
            return Err(ImpactError::NotFound("Task".into()));
        }

        match self
            .submissions
            .inner()
            .insert_one(SubmissionDoc::from(submission.clone()))
            .session(&mut *session)
            .await
        {
            Ok(_) => Ok(submission),
            Err(e) if is_duplicate_key(&e) => Err(ImpactError::Conflict(
                "You already have an open or approved submission for this task".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_task_in(&self, session: &mut ClientSession, id: &str) -> Result<()> {
        let referenced = self
            .submissions
            .inner()
            .count_documents(doc! { "task_id": id })
            .limit(1)
            .session(&mut *session)
            .await?;
        if referenced > 0 {
            return Err(ImpactError::Conflict(
                "Task has submissions and cannot be deleted".into(),
            ));
        }

        let deleted = self
            .tasks
            .inner()
            .delete_one(doc! { "_id": id })
            .session(&mut *session)
            .await?;
        if deleted.deleted_count == 0 {
            return Err(ImpactError::NotFound("Task".into()));
        }

        self.users
            .inner()
            .update_many(
                doc! { "current_task_id": id },
                doc! {
                    "$unset": { "current_task_id": "" },
                    "$set": { "metadata.updated_at": DateTime::now() },
                },
            )
            .session(&mut *session)
            .await?;
        Ok(())
    }

    async fn update_user(&self, id: &str, set: Document) -> Result<Option<User>> {
        let updated = self
            .users
            .inner()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await?;
        updated.map(User::try_from).transpose()
    }
}

#[async_trait]
impl ImpactStore for MongoImpactStore {
    async fn provision_user(&self, user: User) -> Result<User> {
        let id = user.id.clone();
        let mut fields = to_document(&UserDoc::from(user))?;
        fields.remove("_id");

        let result = self
            .users
            .inner()
            .find_one_and_update(doc! { "_id": &id }, doc! { "$setOnInsert": fields })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        match result {
            Ok(Some(doc)) => User::try_from(doc),
            Ok(None) => Err(ImpactError::Internal("upsert returned no document".into())),
            // Two first requests raced on the same identity; the other one won
            Err(e) if is_duplicate_key(&e) => self
                .get_user(&id)
                .await?
                .ok_or_else(|| ImpactError::Transient("user provisioning raced".into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.users
            .find_one(doc! { "_id": id })
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<Option<User>> {
        let mut set = doc! { "metadata.updated_at": DateTime::now() };
        if let Some(name) = &update.display_name {
            set.insert("display_name", name);
        }
        if let Some(dept) = &update.dept {
            set.insert("dept", dept);
        }
        self.update_user(id, set).await
    }

    async fn set_role(&self, id: &str, role: Role) -> Result<Option<User>> {
        self.update_user(
            id,
            doc! { "role": role.as_str(), "metadata.updated_at": DateTime::now() },
        )
        .await
    }

    async fn insert_task(&self, task: Task) -> Result<Task> {
        match self.tasks.insert_one(TaskDoc::try_from(task.clone())?).await {
            Ok(()) => Ok(task),
            Err(e) if is_duplicate_key(&e) => Err(ImpactError::Conflict(format!(
                "Task '{}' already exists",
                task.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.tasks
            .find_one(doc! { "_id": id })
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        self.tasks
            .find_many(doc! {}, doc! { "metadata.created_at": 1, "_id": 1 }, None)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task> {
        let mut session = self.client.begin().await?;
        let result = self.update_task_in(&mut session, id, update).await;
        self.client.finish(session, result).await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let mut session = self.client.begin().await?;
        let result = self.delete_task_in(&mut session, id).await;
        self.client.finish(session, result).await
    }

    async fn insert_submission(&self, submission: Submission) -> Result<Submission> {
        let mut session = self.client.begin().await?;
        let result = self.insert_submission_in(&mut session, submission).await;
        self.client.finish(session, result).await
    }

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        self.submissions
            .find_one(doc! { "_id": id })
            .await?
            .map(Submission::try_from)
            .transpose()
    }

    async fn list_submissions(&self, filter: &SubmissionFilter) -> Result<Vec<Submission>> {
        let mut query = Document::new();
        if let Some(status) = filter.status {
            query.insert("status", status.as_str());
        }
        if let Some(student_id) = &filter.student_id {
            query.insert("student_id", student_id);
        }
        if let Some(task_id) = &filter.task_id {
            query.insert("task_id", task_id);
        }

        self.submissions
            .find_many(query, doc! { "metadata.created_at": 1, "_id": 1 }, None)
            .await?
            .into_iter()
            .map(Submission::try_from)
            .collect()
    }

    async fn close_submission(
        &self,
        id: &str,
        closure: Closure,
        credit: Option<CreditEntry>,
    ) -> Result<CloseOutcome> {
        let mut session = self.client.begin().await?;
        let result = self.close_in(&mut session, id, closure, credit).await;
        self.client.finish(session, result).await
    }

    async fn apply_credit(&self, entry: CreditEntry) -> Result<CreditOutcome> {
        let mut session = self.client.begin().await?;
        let result = self.apply_credit_in(&mut session, entry).await;
        self.client.finish(session, result).await
    }

    async fn credits_for(&self, user_id: &str) -> Result<Vec<CreditEntry>> {
        self.credits
            .find_many(doc! { "user_id": user_id }, doc! { "applied_at": 1 }, None)
            .await?
            .into_iter()
            .map(CreditEntry::try_from)
            .collect()
    }

    async fn set_current_task(&self, user_id: &str, task_id: &str) -> Result<User> {
        self.update_user(
            user_id,
            doc! { "current_task_id": task_id, "metadata.updated_at": DateTime::now() },
        )
        .await?
        .ok_or_else(|| ImpactError::NotFound("User".into()))
    }

    async fn find_match_candidate(&self, task_id: &str, exclude: &str) -> Result<Option<User>> {
        self.users
            .inner()
            .find_one(doc! {
                "current_task_id": task_id,
                "companion_id": null,
                "_id": { "$ne": exclude },
            })
            .sort(doc! { "metadata.updated_at": 1, "_id": 1 })
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn link_companions(&self, a: &str, b: &str, task_id: &str) -> Result<LinkOutcome> {
        if a == b {
            return Err(ImpactError::Validation(
                "Cannot pair a user with themselves".into(),
            ));
        }
        let mut session = self.client.begin().await?;
        match self.link_in(&mut session, a, b, task_id).await {
            // The first half may already be written
            Ok(LinkOutcome::Claimed) => {
                MongoClient::abort(&mut session).await;
                Ok(LinkOutcome::Claimed)
            }
            other => self.client.finish(session, other).await,
        }
    }

    async fn unlink_companion(&self, user_id: &str) -> Result<Option<String>> {
        let mut session = self.client.begin().await?;
        let result = self.unlink_in(&mut session, user_id).await;
        self.client.finish(session, result).await
    }

    async fn top_users(&self, limit: usize) -> Result<Vec<User>> {
        let docs = self
            .users
            .find_many(
                doc! {},
                doc! { "impact_score": -1, "metadata.created_at": 1, "_id": 1 },
                Some(limit as i64),
            )
            .await?;
        users_from(docs)
    }

    async fn count_ranked_ahead(&self, user: &User, cap: u64) -> Result<u64> {
        let score = user.impact_score as i64;
        let created = DateTime::from_chrono(user.created_at);
        let filter = doc! {
            "$or": [
                { "impact_score": { "$gt": score } },
                { "impact_score": score, "metadata.created_at": { "$lt": created } },
                { "impact_score": score, "metadata.created_at": created, "_id": { "$lt": &user.id } },
            ]
        };

        Ok(self
            .users
            .inner()
            .count_documents(filter)
            .limit(cap)
            .await?)
    }
}
