//! Domain records shared by the services and the store backends.
//!
//! These are store-agnostic. The MongoDB backend converts to and from its
//! own document schemas in `db::schemas`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::auth::Role;
use crate::types::ImpactError;

// =============================================================================
// User
// =============================================================================

/// A participant. Keyed by verified email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dept: Option<String>,
    pub role: Role,
    pub impact_score: u64,
    pub tasks_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A freshly provisioned record with zero score and no pairing
    pub fn provisioned(id: String, display_name: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name,
            dept: None,
            role,
            impact_score: 0,
            tasks_completed: 0,
            current_task_id: None,
            companion_id: None,
            mentor_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ordering key used by the leaderboard: higher score first, then
    /// earlier creation, then id.
    pub fn is_ranked_ahead_of(&self, other: &User) -> bool {
        (std::cmp::Reverse(self.impact_score), self.created_at, &self.id)
            < (std::cmp::Reverse(other.impact_score), other.created_at, &other.id)
    }
}

/// Self-service profile edit. Role, score and pairing are not editable here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub dept: Option<String>,
}

// =============================================================================
// Task
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(ImpactError::Validation(format!(
                "Unknown difficulty '{other}'"
            ))),
        }
    }
}

/// A catalog entry. `score` is the fixed reward credited on approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub difficulty: Difficulty,
    pub score: u64,
    pub created_at: DateTime<Utc>,
}

/// Admin request to create a task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub score: u64,
}

fn default_category() -> String {
    "General".to_string()
}

/// Admin request to edit a task. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<Difficulty>,
    pub score: Option<u64>,
}

// =============================================================================
// Submission
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            SubmissionStatus::Pending => false,
            SubmissionStatus::Approved | SubmissionStatus::Rejected => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            other => Err(ImpactError::Internal(format!(
                "unknown submission status '{other}'"
            ))),
        }
    }
}

/// Proof-of-work links attached to a submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

impl ProofLinks {
    /// Supplied links with blanks dropped
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("drive", self.drive.as_deref()),
            ("screenshot", self.screenshot.as_deref()),
            ("other", self.other.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, link)| {
            link.map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| (name, l))
        })
    }

    /// Copy with whitespace trimmed and empty strings removed
    pub fn normalized(&self) -> Self {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            drive: clean(&self.drive),
            screenshot: clean(&self.screenshot),
            other: clean(&self.other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub student_id: String,
    pub task_id: String,
    pub status: SubmissionStatus,
    pub links: ProofLinks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_id: Option<String>,
}

impl Submission {
    pub fn pending(student_id: String, task_id: String, links: ProofLinks) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            student_id,
            task_id,
            status: SubmissionStatus::Pending,
            links,
            feedback: None,
            created_at: Utc::now(),
            verified_at: None,
            verifier_id: None,
        }
    }
}

/// Terminal transition written by the verification workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closure {
    pub status: SubmissionStatus,
    pub feedback: Option<String>,
    pub verified_at: DateTime<Utc>,
    pub verifier_id: String,
}

/// Review-queue filter
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub status: Option<SubmissionStatus>,
    pub student_id: Option<String>,
    pub task_id: Option<String>,
}

impl SubmissionFilter {
    pub fn matches(&self, submission: &Submission) -> bool {
        self.status.map_or(true, |s| submission.status == s)
            && self
                .student_id
                .as_deref()
                .map_or(true, |s| submission.student_id == s)
            && self
                .task_id
                .as_deref()
                .map_or(true, |t| submission.task_id == t)
    }
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditKind {
    Approval,
    Correction,
}

impl CreditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CreditKind::Approval => "approval",
            CreditKind::Correction => "correction",
        }
    }
}

/// One applied score mutation. `key` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditEntry {
    pub key: String,
    pub user_id: String,
    pub amount: i64,
    pub kind: CreditKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub applied_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub applied_at: DateTime<Utc>,
}

impl CreditEntry {
    /// Approvals also bump the completed-task counter
    pub fn completes_task(&self) -> bool {
        match self.kind {
            CreditKind::Approval => true,
            CreditKind::Correction => false,
        }
    }
}

/// Result of applying a credit entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// The entry was new; carries the user after mutation
    Applied(User),
    /// The key was already recorded; nothing changed
    AlreadyApplied,
}

impl CreditOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(self, CreditOutcome::Applied(_))
    }
}

/// Result of an atomic terminal transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub submission: Submission,
    pub credit: Option<CreditOutcome>,
}

/// Result of an atomic companion claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// One side was already paired or the candidate left the task
    Claimed,
}
