use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::info;

use deadman_server::{build_router, startup, sweeper, AppState};

// ── CLI ─────────────────────────────────────────────────────────────

/// Dead man's switch monitor: tracks check-ins and alerts when they stop.
#[derive(Parser, Debug)]
#[command(name = "deadman", version, about)]
struct Cli {
    /// YAML file with checks and channels to create at startup.
    #[arg(long, env = "DEADMAN_SEED", global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the admin API and the deadline sweeper (default).
    Serve {
        /// Do not start the background sweeper.
        #[arg(long)]
        no_sweeper: bool,
    },
    /// Run a single sweep pass and exit.
    Sweep,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    deadman_core::config::load_dotenv();
    let config = deadman_core::Config::from_env();
    config.log_summary();

    let runtime = startup::init(&config, cli.seed.as_deref()).await?;

    match cli.command.unwrap_or(Command::Serve { no_sweeper: false }) {
        Command::Sweep => {
            let report = runtime.monitor.sweep(Utc::now()).await?;
            info!(
                evaluated = report.evaluated,
                flipped = report.flipped,
                errors = report.errors,
                recovered = report.recovered,
                "Sweep finished"
            );
        }
        Command::Serve { no_sweeper } => {
            let shutdown = Arc::new(Notify::new());
            let sweeper = (!no_sweeper).then(|| {
                let stop = Arc::clone(&shutdown);
                tokio::spawn(sweeper::run(
                    Arc::clone(&runtime.monitor),
                    Duration::from_secs(config.sweep.interval_secs.max(1)),
                    async move { stop.notified().await },
                ))
            });

            let state = Arc::new(AppState::new(
                Arc::clone(&runtime.monitor),
                runtime.backend,
                config.redacted_summary(),
            ));
            let app = build_router(state, &config.server.cors_origin);

            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Server listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Shutdown signal received");
                })
                .await?;

            shutdown.notify_one();
            if let Some(handle) = sweeper {
                handle.await?;
            }
        }
    }

    info!("deadman exited cleanly");
    Ok(())
}
