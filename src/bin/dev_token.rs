//! impact-dev-token - mint identity tokens for local development
//!
//! Prints a bearer token signed with the same secret the server uses, so a
//! dev-mode instance can be exercised with curl.
//!
//! Usage:
//!   impact-dev-token --email asha@example.edu --name Asha
//!
//! Environment variables:
//!   IDENTITY_JWT_SECRET - shared secret (default: the built-in dev secret)
//!   IDENTITY_TOKEN_EXPIRY_SECONDS - token lifetime (default: 3600)

use clap::Parser;
use impact_core::auth::{IdentityTokenValidator, TokenInput, DEV_SECRET};

#[derive(Parser, Debug)]
#[command(name = "impact-dev-token")]
#[command(about = "Mint identity tokens for a dev-mode impact-core")]
#[command(version)]
struct Args {
    /// Email to assert
    #[arg(long)]
    email: String,

    /// Display name claim
    #[arg(long)]
    name: Option<String>,

    /// Mint a token whose email is not verified
    #[arg(long, default_value = "false")]
    unverified: bool,

    /// Shared secret
    #[arg(long, env = "IDENTITY_JWT_SECRET")]
    secret: Option<String>,

    /// Token lifetime in seconds
    #[arg(long, env = "IDENTITY_TOKEN_EXPIRY_SECONDS", default_value = "3600")]
    expiry_seconds: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let secret = args.secret.unwrap_or_else(|| DEV_SECRET.to_string());
    let validator = IdentityTokenValidator::new(secret, args.expiry_seconds)?;

    let token = validator.generate_token(TokenInput {
        subject: format!("dev|{}", args.email),
        email: args.email,
        email_verified: !args.unverified,
        name: args.name,
    })?;

    println!("{}", token);
    Ok(())
}
