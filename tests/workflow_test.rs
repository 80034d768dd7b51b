//! End-to-end workflow tests against the in-memory store

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier};
use tokio_test::{assert_err, assert_ok};

use impact_core::auth::{RequestContext, Role};
use impact_core::services::{
    CompanionMatch, CompanionMatchmaker, Decision, LeaderboardRanker, MentorNotifier,
    MentorRequest, NewSubmission, RetryPolicy, RewardLedger, SubmissionDesk,
    VerificationWorkflow,
};
use impact_core::store::memory::FailurePoint;
use impact_core::store::{ImpactStore, MemoryStore};
use impact_core::types::{
    CreditOutcome, Difficulty, ImpactError, ProofLinks, Submission, SubmissionStatus, Task, User,
};

/// Rounds per race test, each on a fresh world
const RACE_ROUNDS: usize = 64;

/// Forwards mentor requests to the test
struct RecordingNotifier {
    tx: mpsc::UnboundedSender<MentorRequest>,
}

#[async_trait]
impl MentorNotifier for RecordingNotifier {
    async fn mentor_requested(&self, request: MentorRequest) -> impact_core::Result<()> {
        let _ = self.tx.send(request);
        Ok(())
    }
}

struct World {
    store: Arc<MemoryStore>,
    desk: SubmissionDesk,
    verification: Arc<VerificationWorkflow>,
    ledger: RewardLedger,
    matchmaker: Arc<CompanionMatchmaker>,
    leaderboard: LeaderboardRanker,
    mentor_requests: mpsc::UnboundedReceiver<MentorRequest>,
}

impl World {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let retry = RetryPolicy::immediate(3);

        for (id, role) in [
            ("admin@x.io", Role::Admin),
            ("mentor1@x.io", Role::Mentor),
            ("mentor2@x.io", Role::Mentor),
            ("u1@x.io", Role::Student),
            ("u2@x.io", Role::Student),
            ("u3@x.io", Role::Student),
            ("u4@x.io", Role::Student),
            ("u5@x.io", Role::Student),
        ] {
            store
                .provision_user(User::provisioned(id.into(), id.into(), role))
                .await
                .unwrap();
        }
        for (id, score) in [("T1", 500), ("T2", 150), ("T3", 80)] {
            store
                .insert_task(Task {
                    id: id.into(),
                    title: format!("Task {id}"),
                    description: String::new(),
                    category: "Community".into(),
                    difficulty: Difficulty::Medium,
                    score,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let (tx, mentor_requests) = mpsc::unbounded_channel();
        let shared: Arc<dyn ImpactStore> = store.clone();

        Self {
            desk: SubmissionDesk::new(shared.clone(), retry.clone()),
            verification: Arc::new(VerificationWorkflow::new(shared.clone(), retry.clone())),
            ledger: RewardLedger::new(shared.clone(), retry.clone()),
            matchmaker: Arc::new(CompanionMatchmaker::new(
                shared.clone(),
                Arc::new(RecordingNotifier { tx }),
                retry.clone(),
            )),
            leaderboard: LeaderboardRanker::new(shared, retry, 100, 10_000),
            store,
            mentor_requests,
        }
    }

    async fn ctx(&self, id: &str) -> RequestContext {
        RequestContext::new(self.user(id).await)
    }

    async fn user(&self, id: &str) -> User {
        self.store.get_user(id).await.unwrap().unwrap()
    }

    async fn submit(&self, student: &str, task_id: &str) -> Submission {
        self.desk
            .create(
                &self.ctx(student).await,
                NewSubmission {
                    task_id: task_id.into(),
                    links: ProofLinks {
                        drive: Some("https://drive.example.com/proof".into()),
                        ..ProofLinks::default()
                    },
                },
            )
            .await
            .unwrap()
    }

    async fn status_of(&self, submission_id: &str) -> SubmissionStatus {
        self.store
            .get_submission(submission_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

#[tokio::test]
async fn admin_approval_credits_task_score_once() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;

    let approved = assert_ok!(
        world
            .verification
            .verify(&world.ctx("admin@x.io").await, &s1.id, Decision::Approved, None)
            .await
    );
    assert_eq!(approved.status, SubmissionStatus::Approved);
    assert_eq!(approved.verifier_id.as_deref(), Some("admin@x.io"));
    assert!(approved.verified_at.is_some());

    let u1 = world.user("u1@x.io").await;
    assert_eq!(u1.impact_score, 500);
    assert_eq!(u1.tasks_completed, 1);

    let audit = world
        .ledger
        .audit(&world.ctx("admin@x.io").await, "u1@x.io")
        .await
        .unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.entries.len(), 1);
    assert_eq!(audit.entries[0].key, s1.id);
}

#[tokio::test]
async fn student_cannot_verify() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;

    let err = assert_err!(
        world
            .verification
            .verify(&world.ctx("u2@x.io").await, &s1.id, Decision::Approved, None)
            .await
    );
    assert_eq!(err, ImpactError::AuthorizationDenied);
    assert_eq!(
        err.public_message(),
        "You do not have permission to perform this action"
    );

    assert_eq!(world.status_of(&s1.id).await, SubmissionStatus::Pending);
    assert_eq!(world.user("u1@x.io").await.impact_score, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_credit_once() {
    for round in 0..RACE_ROUNDS {
        let world = World::new().await;
        let s1 = world.submit("u1@x.io", "T1").await;
        let barrier = Arc::new(Barrier::new(2));

        let mut callers = Vec::new();
        for mentor in ["mentor1@x.io", "mentor2@x.io"] {
            let ctx = world.ctx(mentor).await;
            let verification = Arc::clone(&world.verification);
            let barrier = Arc::clone(&barrier);
            let id = s1.id.clone();
            callers.push(tokio::spawn(async move {
                barrier.wait().await;
                verification.verify(&ctx, &id, Decision::Approved, None).await
            }));
        }
        let outcomes: Vec<_> = futures::future::join_all(callers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");
        assert!(
            outcomes
                .iter()
                .any(|r| matches!(r, Err(ImpactError::Conflict(_)))),
            "round {round}"
        );

        let u1 = world.user("u1@x.io").await;
        assert_eq!(u1.impact_score, 500, "round {round}");
        assert_eq!(u1.tasks_completed, 1, "round {round}");
        assert_eq!(world.store.credits_for("u1@x.io").await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn second_verify_is_conflict() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;
    let mentor = world.ctx("mentor1@x.io").await;

    assert_ok!(world.verification.verify(&mentor, &s1.id, Decision::Approved, None).await);
    let err = assert_err!(
        world
            .verification
            .verify(&mentor, &s1.id, Decision::Rejected, Some("late"))
            .await
    );
    assert!(matches!(err, ImpactError::Conflict(_)));
    assert_eq!(world.status_of(&s1.id).await, SubmissionStatus::Approved);
    assert_eq!(world.user("u1@x.io").await.impact_score, 500);
}

#[tokio::test]
async fn rejection_needs_feedback() {
    let world = World::new().await;
    let s2 = world.submit("u2@x.io", "T2").await;
    let mentor = world.ctx("mentor1@x.io").await;

    for feedback in [None, Some(""), Some("   ")] {
        let err = assert_err!(
            world
                .verification
                .verify(&mentor, &s2.id, Decision::Rejected, feedback)
                .await
        );
        assert!(matches!(err, ImpactError::Validation(_)));
    }
    assert_eq!(world.status_of(&s2.id).await, SubmissionStatus::Pending);

    let rejected = assert_ok!(
        world
            .verification
            .verify(&mentor, &s2.id, Decision::Rejected, Some("Link is private"))
            .await
    );
    assert_eq!(rejected.feedback.as_deref(), Some("Link is private"));
    assert_eq!(world.user("u2@x.io").await.impact_score, 0);
}

#[tokio::test]
async fn rejected_task_can_be_resubmitted() {
    let world = World::new().await;
    let first = world.submit("u2@x.io", "T2").await;
    let mentor = world.ctx("mentor1@x.io").await;

    let dup = world
        .desk
        .create(
            &world.ctx("u2@x.io").await,
            NewSubmission {
                task_id: "T2".into(),
                links: ProofLinks {
                    other: Some("https://example.com/again".into()),
                    ..ProofLinks::default()
                },
            },
        )
        .await;
    assert!(matches!(dup, Err(ImpactError::Conflict(_))));

    world
        .verification
        .verify(&mentor, &first.id, Decision::Rejected, Some("blurry"))
        .await
        .unwrap();

    let second = world.submit("u2@x.io", "T2").await;
    assert_eq!(second.status, SubmissionStatus::Pending);
}

#[tokio::test]
async fn lost_acknowledgement_is_replayed() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;
    world
        .store
        .inject_transient_failures(1, FailurePoint::AfterWrite);

    let approved = assert_ok!(
        world
            .verification
            .verify(&world.ctx("mentor1@x.io").await, &s1.id, Decision::Approved, None)
            .await
    );
    assert_eq!(approved.status, SubmissionStatus::Approved);
    assert_eq!(world.user("u1@x.io").await.impact_score, 500);
}

#[tokio::test]
async fn exhausted_retries_leave_nothing_written() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;
    world
        .store
        .inject_transient_failures(3, FailurePoint::BeforeWrite);

    let err = assert_err!(
        world
            .verification
            .verify(&world.ctx("mentor1@x.io").await, &s1.id, Decision::Approved, None)
            .await
    );
    assert!(err.is_transient());
    assert_eq!(
        err.public_message(),
        "Service temporarily unavailable, try again later"
    );
    assert_eq!(world.status_of(&s1.id).await, SubmissionStatus::Pending);
    assert_eq!(world.user("u1@x.io").await.impact_score, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_students_pair_with_each_other() {
    for round in 0..RACE_ROUNDS {
        let world = World::new().await;
        let barrier = Arc::new(Barrier::new(2));

        let mut callers = Vec::new();
        for (student, other) in [("u3@x.io", "u4@x.io"), ("u4@x.io", "u3@x.io")] {
            let ctx = world.ctx(student).await;
            let matchmaker = Arc::clone(&world.matchmaker);
            let barrier = Arc::clone(&barrier);
            callers.push(tokio::spawn(async move {
                barrier.wait().await;
                (other, matchmaker.find_companion(&ctx, "T2").await)
            }));
        }

        // Whoever searched first may have been told to wait for a mentor;
        // every pairing reported must name the other student.
        for joined in futures::future::join_all(callers).await {
            let (other, result) = joined.unwrap();
            if let CompanionMatch::Paired { companion } = assert_ok!(result) {
                assert_eq!(companion.id, other, "round {round}");
            }
        }

        let u3 = world.user("u3@x.io").await;
        let u4 = world.user("u4@x.io").await;
        assert_eq!(u3.companion_id.as_deref(), Some("u4@x.io"), "round {round}");
        assert_eq!(u4.companion_id.as_deref(), Some("u3@x.io"), "round {round}");
        assert_eq!(world.user("u5@x.io").await.companion_id, None);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn companion_links_stay_symmetric() {
    let students = ["u1@x.io", "u2@x.io", "u3@x.io", "u4@x.io", "u5@x.io"];

    for round in 0..RACE_ROUNDS {
        let world = World::new().await;
        let barrier = Arc::new(Barrier::new(students.len()));

        let mut callers = Vec::new();
        for id in students {
            let ctx = world.ctx(id).await;
            let matchmaker = Arc::clone(&world.matchmaker);
            let barrier = Arc::clone(&barrier);
            callers.push(tokio::spawn(async move {
                barrier.wait().await;
                (id, matchmaker.find_companion(&ctx, "T3").await)
            }));
        }

        let mut replies = Vec::new();
        for joined in futures::future::join_all(callers).await {
            let (id, result) = joined.unwrap();
            match result {
                Ok(reply) => replies.push((id, reply)),
                // Contended searches may give up; the links must still hold
                Err(ImpactError::Conflict(_)) => {}
                Err(e) => panic!("round {round}: {id} failed with {e}"),
            }
        }

        let mut paired = 0;
        for id in students {
            let user = world.user(id).await;
            if let Some(companion) = &user.companion_id {
                assert_ne!(companion, id, "round {round}");
                let other = world.user(companion).await;
                assert_eq!(other.companion_id.as_deref(), Some(id), "round {round}");
                paired += 1;
            }
        }
        assert_eq!(paired % 2, 0, "round {round}");
        assert!(paired >= 2, "round {round}");

        for (id, reply) in replies {
            if let CompanionMatch::Paired { companion } = reply {
                let stored = world.user(id).await.companion_id;
                assert_eq!(stored.as_deref(), Some(companion.id.as_str()), "round {round}");
            }
        }
    }
}

#[tokio::test]
async fn lone_student_gets_mentor_request() {
    let mut world = World::new().await;

    let result = world
        .matchmaker
        .find_companion(&world.ctx("u5@x.io").await, "T3")
        .await
        .unwrap();
    assert_eq!(result, CompanionMatch::MentorRequested);

    let request = tokio::time::timeout(
        std::time::Duration::from_secs(1),
        world.mentor_requests.recv(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(request.user_id, "u5@x.io");
    assert_eq!(request.task_id, "T3");
    assert_eq!(request.task_title, "Task T3");
}

#[tokio::test]
async fn equal_scores_rank_by_creation_time() {
    let world = World::new().await;
    let now = Utc::now();

    for (id, score, age_days) in [
        ("late900@x.io", 900, 1),
        ("early900@x.io", 900, 30),
        ("mid700@x.io", 700, 10),
    ] {
        let mut user = User::provisioned(id.into(), id.into(), Role::Student);
        user.impact_score = score;
        user.created_at = now - Duration::days(age_days);
        world.store.put_user(user).await;
    }

    let top = world.leaderboard.top_n(Some(3)).await.unwrap();
    let names: Vec<_> = top.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["early900@x.io", "late900@x.io", "mid700@x.io"]);
    assert_eq!(top[0].rank, 1);
    assert!(top.windows(2).all(|w| w[0].score >= w[1].score));

    assert_eq!(world.leaderboard.top_n(Some(3)).await.unwrap(), top);

    let rank = world.leaderboard.rank_of("late900@x.io").await.unwrap();
    assert_eq!(rank.rank, Some(2));
}

#[tokio::test]
async fn approvals_move_leaderboard() {
    let world = World::new().await;
    let mentor = world.ctx("mentor1@x.io").await;

    let s1 = world.submit("u1@x.io", "T2").await;
    let s2 = world.submit("u2@x.io", "T1").await;
    for id in [&s1.id, &s2.id] {
        world
            .verification
            .verify(&mentor, id, Decision::Approved, None)
            .await
            .unwrap();
    }

    let top = world.leaderboard.top_n(Some(2)).await.unwrap();
    assert_eq!(top[0].name, "u2@x.io");
    assert_eq!(top[0].score, 500);
    assert_eq!(top[1].name, "u1@x.io");
    assert_eq!(top[1].tasks_completed, 1);
}

#[tokio::test]
async fn standalone_credit_shares_approval_keys() {
    let world = World::new().await;
    let s1 = world.submit("u1@x.io", "T1").await;
    world
        .verification
        .verify(&world.ctx("mentor1@x.io").await, &s1.id, Decision::Approved, None)
        .await
        .unwrap();

    // Replaying the approval by hand is a no-op
    let replay = world
        .ledger
        .credit("u1@x.io", 500, &s1.id, "admin@x.io")
        .await
        .unwrap();
    assert_eq!(replay, CreditOutcome::AlreadyApplied);

    let imported = world
        .ledger
        .credit("u1@x.io", 80, "import-2025-spring", "admin@x.io")
        .await
        .unwrap();
    assert!(matches!(imported, CreditOutcome::Applied(_)));

    let u1 = world.user("u1@x.io").await;
    assert_eq!(u1.impact_score, 580);
    assert_eq!(u1.tasks_completed, 2);
}
