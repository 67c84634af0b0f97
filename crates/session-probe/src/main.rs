//! Session probe - runs the session reconciler once against a backend and
//! inspects the persisted session credential.

mod provider;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use credential_storage::open_credential_slot;
use provider::StaticTokenProvider;
use reconciler_config_and_utils::{init_logging, Config, LogConfig, Paths};
use session_reconciler::{
    AuthGate, GatePolicy, HttpSessionBackend, Navigator, ReconciliationEngine,
};
use tracing::{info, warn};

/// Session probe command-line interface.
#[derive(Parser)]
#[command(name = "session-probe")]
#[command(about = "Reconcile and inspect the persisted backend session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, credential store and logs. Defaults to ~/.session-reconciler
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the stored session with the backend and print the result
    Status {
        /// Access token of the signed-in user; omit to act as signed out
        #[arg(long, env = "SESSION_PROBE_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Give up waiting for the engine to settle after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Print the stored session credential
    Show,
    /// Remove the stored session credential
    Clear,
}

/// Prints redirects instead of performing them.
struct PrintNavigator;

impl Navigator for PrintNavigator {
    fn navigate(&self, target: &str) {
        println!("redirect: {}", target);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    init_logging(&LogConfig {
        service_name: "session-probe".to_string(),
        default_level: cli.log_level.unwrap_or_else(|| config.log_level.clone()),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })?;

    let slot = open_credential_slot(paths.credential_store_file(), &config.credential_key)
        .context("failed to open credential store")?;

    match cli.command {
        Commands::Status {
            token,
            timeout_secs,
        } => {
            let provider = Arc::new(StaticTokenProvider::new(token));
            let backend = HttpSessionBackend::new(
                &config.backend_url,
                config.backend_api_key.clone(),
                provider.clone(),
            )?;

            let engine = Arc::new(
                ReconciliationEngine::builder(slot, provider, Arc::new(backend))
                    .retry_policy(config.retry.clone())
                    .start(),
            );
            let gate = AuthGate::attach(
                engine.clone(),
                GatePolicy {
                    redirect_if_unauthenticated: config.redirect_if_unauthenticated,
                    landing_path: config.landing_path.clone(),
                },
                Arc::new(PrintNavigator),
            );

            let settled = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                engine.wait_until_settled(),
            )
            .await;
            if settled.is_err() {
                warn!(timeout_secs, "engine did not settle in time");
            }

            println!("{}", serde_json::to_string_pretty(&gate.state())?);
            gate.detach();
            engine.shutdown().await;
        }
        Commands::Show => match slot.get()? {
            Some(credential) => println!("{}", credential),
            None => println!("(none)"),
        },
        Commands::Clear => {
            slot.set(None)?;
            info!(key = %slot.key(), "stored session credential cleared");
            println!("cleared");
        }
    }

    Ok(())
}
