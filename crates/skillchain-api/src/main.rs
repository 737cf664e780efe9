//! Skill chain CLI and REST API entry point.
//!
//! Binary name: `skc`
//!
//! Parses CLI arguments, opens the chain store, then dispatches to the
//! appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio::sync::broadcast;

use cli::{Cli, Commands};
use skillchain_types::event::ChainEvent;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    skillchain_observe::tracing_setup::init_tracing(cli::log_filter(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli).await;
    skillchain_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "skc", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Chain { action } => {
            cli::chain::handle_chain_command(action, &state, cli.json).await?;
        }

        Commands::Exec { action } => {
            cli::execution::handle_exec_command(action, &state, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            let events = state.engine.events().subscribe();
            tokio::spawn(log_events(events));

            println!(
                "  {} Skill chain API listening on {}",
                console::style("*").green().bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!("  {}", console::style("Press Ctrl+C to stop").dim());

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Log every chain event until the bus closes.
async fn log_events(mut events: broadcast::Receiver<ChainEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let execution_id = event.execution_id();
                match serde_json::to_string(&event) {
                    Ok(payload) => {
                        tracing::info!(execution_id = %execution_id, event = %payload, "chain event")
                    }
                    Err(e) => tracing::warn!(execution_id = %execution_id, "unserializable chain event: {e}"),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger lagged behind the event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
