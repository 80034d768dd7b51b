//! impact-core - verification, reward ledger and companion matching
//!
//! Students submit proof of work for impact tasks. Mentors and admins verify
//! it, approved work credits the student's score through an idempotent
//! ledger, and students working the same task can be paired up.
//!
//! ## Services
//!
//! - **Identity**: resolves identity tokens to stored users, provisioning on first sign-in
//! - **Verification**: approve/reject with atomic, exactly-once crediting
//! - **Ledger**: credit entries keyed by idempotency key, corrections, audits
//! - **Matchmaker**: pairs students on the same task, or asks for a mentor
//! - **Leaderboard**: top-N and rank lookups with a deterministic tie-break

pub mod auth;
pub mod config;
pub mod db;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{ImpactError, Result};
