//! CLI argument parsing using clap 4.x derive macros

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Push proactive notifications into dormant conversations
#[derive(Parser, Debug)]
#[command(name = "nudge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the platform config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "nudge_core=debug" (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the WebSocket server; every connection is one conversation
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the persisted registry
    Show,

    /// Send a notifyEvent to a running server as a system producer
    Notify {
        /// Registered username to notify
        username: String,

        /// Message text
        #[arg(num_args = 1.., required = true)]
        message: Vec<String>,

        /// Server URL (defaults to the configured host and port)
        #[arg(short, long)]
        url: Option<String>,
    },
}
