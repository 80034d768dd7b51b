//! Shared types: error taxonomy and domain records

pub mod error;
pub mod model;

pub use error::{ImpactError, Result, DENIED_MESSAGE};
pub use model::{
    Closure, CloseOutcome, CreditEntry, CreditKind, CreditOutcome, Difficulty, LinkOutcome,
    NewTask, ProfileUpdate, ProofLinks, Submission, SubmissionFilter, SubmissionStatus, Task,
    TaskUpdate, User,
};
