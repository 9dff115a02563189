//! Sealpair walk-through binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-contained run with an embedded auth server
//! sealpair-demo --seed 42
//!
//! # Against a running auth server sharing the JWT secret
//! SEALPAIR_JWT_SECRET=dev-secret sealpair-demo --auth-url http://127.0.0.1:3000
//! ```

use std::{num::NonZeroU32, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use sealpair_auth::{AuthServer, AuthServerConfig};
use sealpair_client::{AuthService, HttpAuthService, Session, SessionConfig};
use sealpair_demo::{Orchestrator, ScenarioConfig, ScenarioReport};
use sealpair_kms::{
    Environment, KmsJwt, SeededEnv, SystemEnv,
    memory::{MemoryCloud, MemoryKmsConfig},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Sealpair two-party walk-through
#[derive(Parser, Debug)]
#[command(name = "sealpair-demo")]
#[command(about = "Alice and Bob exchange end-to-end encrypted messages")]
#[command(version)]
struct Args {
    /// Authentication service URL. Starts an embedded server when absent.
    #[arg(long)]
    auth_url: Option<String>,

    /// Secret shared between the auth service and the KMS
    #[arg(long, env = "SEALPAIR_JWT_SECRET", hide_env_values = true, default_value = "sealpair-dev-secret")]
    jwt_secret: String,

    /// Backup password
    #[arg(long, default_value = "correct horse")]
    password: String,

    /// Password the backup is changed to
    #[arg(long, default_value = "battery staple")]
    new_password: String,

    /// Seed for reproducible key material
    #[arg(long)]
    seed: Option<u64>,

    /// Encrypt/decrypt repetitions for timing
    #[arg(long, default_value = "1")]
    repetitions: NonZeroU32,

    /// Per-operation timeout in seconds (0 disables)
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Unregister both identities at the end
    #[arg(long)]
    unregister: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let auth_url = match &args.auth_url {
        Some(url) => url.clone(),
        None => start_embedded_auth(&args.jwt_secret).await?,
    };
    let auth: Arc<dyn AuthService> = Arc::new(HttpAuthService::new(&auth_url)?);

    let report = match args.seed {
        Some(seed) => {
            tracing::info!(seed, "Using seeded key material");
            run(SeededEnv::with_seed(seed), auth, &args).await
        },
        None => run(SystemEnv::new(), auth, &args).await,
    };

    for message in report.messages() {
        tracing::info!("{} read from {}: '{}'", message.recipient, message.sender, message.plaintext);
    }

    if report.failures() > 0 {
        tracing::error!("{report}");
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!("{report}");
    Ok(ExitCode::SUCCESS)
}

/// Start an auth server admitting Alice and Bob on an ephemeral port.
async fn start_embedded_auth(jwt_secret: &str) -> Result<String, Box<dyn std::error::Error>> {
    let mut config = AuthServerConfig::new(jwt_secret).allow(["Alice", "Bob"]);
    config.bind_address = "127.0.0.1:0".to_string();

    let server = AuthServer::bind(config, SystemEnv::new()).await?;
    let addr = server.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Embedded auth server stopped: {}", e);
        }
    });

    Ok(format!("http://{addr}"))
}

async fn run<E: Environment>(env: E, auth: Arc<dyn AuthService>, args: &Args) -> ScenarioReport {
    let cloud = MemoryCloud::new(env, KmsJwt::new(args.jwt_secret.as_bytes()), MemoryKmsConfig::default());

    let session_config = SessionConfig {
        operation_timeout: (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs)),
        benchmark_repetitions: args.repetitions,
    };
    let alice = Session::with_config("Alice", Arc::clone(&auth), cloud.clone(), session_config);
    let bob = Session::with_config("Bob", auth, cloud, session_config);

    let scenario = ScenarioConfig {
        password: args.password.clone(),
        new_password: args.new_password.clone(),
        unregister_at_end: args.unregister,
    };

    Orchestrator::new(alice, bob, scenario).run().await
}
