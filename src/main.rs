//! impact-core server binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use impact_core::{config::Args, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("impact_core={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  impact-core");
    info!("  verification, ledger and matching");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Store: {:?}", args.store_backend);
    info!("MongoDB: {} / {}", redact_uri(&args.mongodb_uri), args.mongodb_db);
    info!(
        "Retry: {} attempts, {} ms base delay, {} ms store timeout",
        args.retry_max_attempts, args.retry_base_delay_ms, args.store_timeout_ms
    );
    info!("Bootstrap admins: {}", args.bootstrap_admin_list().len());
    info!(
        "Mentor requests: {}",
        if args.mentor_webhook_url.is_some() { "webhook" } else { "log only" }
    );
    info!("======================================");

    let state = match AppState::from_args(args).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    server::run(state).await?;

    Ok(())
}

/// Hide credentials embedded in a connection string
fn redact_uri(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(_) => uri.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}
