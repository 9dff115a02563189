//! Sealpair authentication server binary.
//!
//! # Usage
//!
//! ```bash
//! # Accept only Alice and Bob
//! SEALPAIR_JWT_SECRET=dev-secret sealpair-auth --bind 127.0.0.1:3000 --allow Alice --allow Bob
//! ```

use std::time::Duration;

use clap::Parser;
use sealpair_auth::{AuthServer, AuthServerConfig};
use sealpair_kms::SystemEnv;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sealpair authentication server
#[derive(Parser, Debug)]
#[command(name = "sealpair-auth")]
#[command(about = "Development authentication service issuing KMS tokens")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    bind: String,

    /// Secret shared with the KMS for signing KMS tokens
    #[arg(long, env = "SEALPAIR_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Lifetime of issued KMS tokens in seconds
    #[arg(long, default_value = "600")]
    token_ttl_secs: u64,

    /// Lifetime of bearer tokens in seconds
    #[arg(long, default_value = "3600")]
    bearer_ttl_secs: u64,

    /// Identity allowed to authenticate (repeatable; default admits all)
    #[arg(long = "allow")]
    allow: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = AuthServerConfig::new(args.jwt_secret);
    config.bind_address = args.bind;
    config.token_ttl = Duration::from_secs(args.token_ttl_secs);
    config.bearer_ttl = Duration::from_secs(args.bearer_ttl_secs);
    if !args.allow.is_empty() {
        config = config.allow(args.allow);
    }

    tracing::info!("Sealpair auth server starting");
    tracing::info!("Binding to {}", config.bind_address);

    let server = AuthServer::bind(config, SystemEnv::new()).await?;
    server.run().await?;

    Ok(())
}
