//! CLI command definitions for the `skc` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (e.g., `skc chain import`, `skc exec status`).

pub mod chain;
pub mod execution;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and operate skill chains.
#[derive(Parser)]
#[command(name = "skc", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage chain definitions (import, list, show, publish, unpublish).
    Chain {
        #[command(subcommand)]
        action: chain::ChainCommand,
    },

    /// Start and operate executions.
    #[command(alias = "execution")]
    Exec {
        #[command(subcommand)]
        action: execution::ExecCommand,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Tracing filter directive for the verbosity flags.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,skillchain=debug",
        _ => "trace",
    }
}
