//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rendezvous - timed barrier between emitters and consumers
#[derive(Parser, Debug)]
#[command(
    name = "rv",
    author,
    version,
    about = "Timed rendezvous barrier: emitters signal, a broker fans out to consumers"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a broker behind the IPC socket
    Serve {
        /// Socket path (overrides config)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Register an emitter with a running broker
    Register {
        /// Emitter id; generated when omitted
        #[arg(short, long)]
        id: Option<String>,
    },

    /// Signal completion for an emitter and wait for the round outcome
    Emit {
        /// Emitter id
        #[arg(required = true)]
        id: String,
    },

    /// Remove an emitter from a running broker
    Unregister {
        /// Emitter id
        #[arg(required = true)]
        id: String,
    },

    /// Show broker counters
    Status,

    /// Check whether a broker is serving
    Ping,

    /// Stop a running broker
    Stop,

    /// Run an in-process round with a logging consumer
    Demo {
        /// Delay before the remaining emitters resolve, in milliseconds
        #[arg(short, long, default_value = "100")]
        delay_ms: u64,

        /// Number of emitters
        #[arg(short, long, default_value = "2")]
        emitters: usize,
    },
}
