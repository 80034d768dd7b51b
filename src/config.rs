//! Configuration for impact-core
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::DEV_SECRET;
use crate::services::RetryPolicy;

/// Store backend selection
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store, lost on restart
    Memory,
    /// MongoDB replica set
    Mongo,
}

/// impact-core - verification, reward ledger and companion matching service
#[derive(Parser, Debug, Clone)]
#[command(name = "impact-core")]
#[command(about = "Verification, reward ledger and companion matching for impact tasks")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Enable development mode (dev identity secret, in-memory store allowed)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Store backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "mongo")]
    pub store_backend: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017/?replicaSet=rs0")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "impact")]
    pub mongodb_db: String,

    /// Secret shared with the identity provider (required in production)
    #[arg(long, env = "IDENTITY_JWT_SECRET")]
    pub identity_jwt_secret: Option<String>,

    /// Lifetime of tokens minted in dev mode
    #[arg(long, env = "IDENTITY_TOKEN_EXPIRY_SECONDS", default_value = "3600")]
    pub identity_token_expiry_seconds: u64,

    /// Comma-separated emails provisioned as admin on first sign-in
    #[arg(long, env = "BOOTSTRAP_ADMINS")]
    pub bootstrap_admins: Option<String>,

    /// Webhook receiving mentor requests (logged only when unset)
    #[arg(long, env = "MENTOR_WEBHOOK_URL")]
    pub mentor_webhook_url: Option<String>,

    /// Mentor webhook timeout in milliseconds
    #[arg(long, env = "MENTOR_WEBHOOK_TIMEOUT_MS", default_value = "5000")]
    pub mentor_webhook_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Timeout for a single store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// Attempts per store operation, including the first
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "3")]
    pub retry_max_attempts: u32,

    /// Backoff before the first retry in milliseconds
    #[arg(long, env = "RETRY_BASE_DELAY_MS", default_value = "50")]
    pub retry_base_delay_ms: u64,

    /// Largest leaderboard page
    #[arg(long, env = "LEADERBOARD_MAX_LIMIT", default_value = "100")]
    pub leaderboard_max_limit: usize,

    /// Users deeper than this are reported with a null rank
    #[arg(long, env = "RANK_DEPTH_CAP", default_value = "10000")]
    pub rank_depth_cap: u64,
}

impl Args {
    /// Get effective identity secret (uses the fixed dev secret in dev mode)
    pub fn identity_secret(&self) -> Option<String> {
        match (&self.identity_jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some(DEV_SECRET.to_string()),
            (None, false) => None,
        }
    }

    /// Parsed, lower-cased BOOTSTRAP_ADMINS
    pub fn bootstrap_admin_list(&self) -> Vec<String> {
        self.bootstrap_admins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            attempt_timeout: Duration::from_millis(self.store_timeout_ms),
            ..RetryPolicy::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            if self.identity_jwt_secret.is_none() {
                return Err("IDENTITY_JWT_SECRET is required in production mode".to_string());
            }
            if self.store_backend == StoreBackend::Memory {
                return Err("STORE_BACKEND=memory is only allowed with DEV_MODE".to_string());
            }
        }

        if let Some(secret) = &self.identity_jwt_secret {
            if secret.len() < 32 {
                return Err("IDENTITY_JWT_SECRET must be at least 32 characters".to_string());
            }
        }

        if let Some(url) = &self.mentor_webhook_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| format!("MENTOR_WEBHOOK_URL is not a valid URL: {e}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err("MENTOR_WEBHOOK_URL must be http or https".to_string());
            }
        }

        if self.retry_max_attempts == 0 {
            return Err("RETRY_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.store_timeout_ms == 0 {
            return Err("STORE_TIMEOUT_MS must be positive".to_string());
        }
        if self.leaderboard_max_limit == 0 || self.rank_depth_cap == 0 {
            return Err("LEADERBOARD_MAX_LIMIT and RANK_DEPTH_CAP must be positive".to_string());
        }

        Ok(())
    }
}
