//! CLI command definitions and dispatch for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing. Run commands take a
//! workflow name and a JSON input; inspection commands take a run id.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Durable workflow engine: start, inspect and cancel workflow runs.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml (defaults to the data directory).
    #[arg(long, global = true, env = "STEPWISE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server and resume unfinished runs.
    Serve {
        /// Port to listen on (defaults to config `server.port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to config `server.host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Start a run and print its id without waiting.
    Start {
        /// Workflow name.
        workflow: String,

        /// JSON input for the run.
        #[arg(long, default_value = "{}")]
        input: String,
    },

    /// Start a run and wait for it to finish.
    Run {
        /// Workflow name.
        workflow: String,

        /// JSON input for the run.
        #[arg(long, default_value = "{}")]
        input: String,

        /// Stop waiting after this many milliseconds (the run continues).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show a run's status, output or error.
    Status {
        /// Run id.
        run_id: Uuid,
    },

    /// Show every step attempt of a run.
    History {
        /// Run id.
        run_id: Uuid,
    },

    /// Cancel a pending or running run.
    Cancel {
        /// Run id.
        run_id: Uuid,

        /// Reason recorded as the run's error.
        #[arg(long, default_value = "cancelled from cli")]
        reason: String,
    },

    /// List resources.
    #[command(alias = "ls")]
    List {
        #[command(subcommand)]
        resource: ListResource,
    },

    /// Check a simple workflow file against the registered targets.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ListResource {
    /// Registered workflows.
    Workflows,

    /// Recent runs, newest first.
    Runs {
        /// Only runs of this workflow.
        #[arg(long)]
        workflow: Option<String>,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}
