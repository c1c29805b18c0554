//! `nudge` - push proactive notifications into dormant conversations
//!
//! `serve` runs the WebSocket shell, `show` prints the persisted registry and
//! `notify` acts as a system producer against a running server.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use nudge_core::turn::render_listing;
use nudge_core::Config;

mod cli;
mod server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    let config = Config::load_or_default(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            server::start_server(&config, &host, port).await?;
        }

        Commands::Show => {
            let store = config.open_store()?;
            let registry = config
                .registry_slot(store)
                .load()
                .await
                .context("Failed to read the registry")?;
            println!("{}", render_listing(&registry.snapshot_for_display()));
        }

        Commands::Notify {
            username,
            message,
            url,
        } => {
            let url = url.unwrap_or_else(|| format!("ws://{}:{}", config.server.host, config.server.port));
            let message = message.join(" ");
            server::send_notify(&url, &username, &message).await?;
            println!("notifyEvent for '{}' sent to {}", username, url);
        }
    }

    Ok(())
}
