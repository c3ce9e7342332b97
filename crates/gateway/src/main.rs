use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gk_domain::config::Config;
use gk_gateway::api;
use gk_gateway::bootstrap::{build_app_state, spawn_background_tasks};
use gk_gateway::cli::{policy_cmd, Cli, Command, PolicyCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(Config::from_env())).await
        }
        Some(Command::Policy { command: PolicyCommand::Validate }) => {
            let config = Config::from_env();
            if !policy_cmd::validate(&config.policy.path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("gatekeeper {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gk_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatekeeper starting");

    let state = build_app_state(config.clone())?;
    spawn_background_tasks(&state);

    let app = api::router(state);
    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        base_url = %config.server.base_url,
        demo_mode = config.server.demo_mode,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gatekeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
