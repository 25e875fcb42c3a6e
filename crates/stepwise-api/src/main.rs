//! Stepwise CLI and REST API entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, initializes configuration, the database and the run
//! controller, then dispatches to a command handler or starts the REST API.

mod cli;
mod http;
mod state;
mod workflows;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands, ListResource};
use state::AppState;
use stepwise_observe::{TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    // The server logs at info unless asked otherwise
    let default_filter = match (&cli.command, cli.verbose, cli.quiet) {
        (Commands::Serve { .. }, 0, false) => "info",
        (_, verbose, quiet) => filter_for_verbosity(verbose, quiet),
    };
    let tracing_options = TracingOptions {
        json: cli.log_json,
        enable_otel: cli.otel,
        ..TracingOptions::new(default_filter)
    };
    init_tracing(&tracing_options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { port, host } => {
            let resumed = state.resume_unfinished().await?;

            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Stepwise API listening on {}",
                    console::style(">").bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  Data directory: {}", state.data_dir.display());
                if resumed > 0 {
                    println!("  Resumed {resumed} unfinished run(s)");
                }
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Start { workflow, input } => {
            cli::workflow::start_run(&state, &workflow, &input, cli.json).await?;
        }

        Commands::Run {
            workflow,
            input,
            timeout_ms,
        } => {
            cli::workflow::run_workflow(&state, &workflow, &input, timeout_ms, cli.json).await?;
        }

        Commands::Status { run_id } => {
            cli::workflow::show_status(&state, run_id, cli.json).await?;
        }

        Commands::History { run_id } => {
            cli::workflow::show_history(&state, run_id, cli.json).await?;
        }

        Commands::Cancel { run_id, reason } => {
            cli::workflow::cancel_run(&state, run_id, &reason, cli.json).await?;
        }

        Commands::List { resource } => match resource {
            ListResource::Workflows => {
                cli::workflow::list_workflows(&state, cli.json)?;
            }
            ListResource::Runs { workflow, limit } => {
                cli::workflow::list_runs(&state, workflow.as_deref(), limit, cli.json).await?;
            }
        },

        Commands::Validate { file } => {
            cli::workflow::validate_file(&state, &file, cli.json)?;
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
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
            Ok(mut signal) => {
                signal.recv().await;
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
    tracing::info!("shutdown signal received");
}
