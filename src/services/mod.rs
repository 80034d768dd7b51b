//! Services layer for impact-core
//!
//! Business logic between the HTTP routes and the store of record.
//!
//! ## Services
//!
//! - **Verification**: closes pending submissions, crediting approvals
//! - **Ledger**: idempotent score credits, corrections and audits
//! - **Matchmaker**: companion pairing on a shared task
//! - **Leaderboard**: ranked view over user scores
//! - **Submissions**: intake and review queue
//! - **Catalog**: task management
//! - **Users**: profiles and roles
//! - **Notifier**: mentor-request delivery
//! - **Retry**: bounded backoff for transient store failures

pub mod catalog;
pub mod leaderboard;
pub mod ledger;
pub mod matchmaker;
pub mod notifier;
pub mod retry;
pub mod submissions;
pub mod users;
pub mod verification;

pub use catalog::TaskCatalog;
pub use leaderboard::{LeaderboardEntry, LeaderboardRanker, RankInfo};
pub use ledger::{LedgerAudit, RewardLedger};
pub use matchmaker::{CompanionMatch, CompanionMatchmaker, CompanionProfile};
pub use notifier::{LogNotifier, MentorNotifier, MentorRequest, WebhookNotifier};
pub use retry::RetryPolicy;
pub use submissions::{NewSubmission, SubmissionDesk};
pub use users::UserDirectory;
pub use verification::{Decision, VerificationWorkflow};
