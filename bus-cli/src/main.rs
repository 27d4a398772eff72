//! # tandem
//!
//! Operator CLI for the Tandem bus.
//!
//! ## Commands
//!
//! - `send`: Connect as a client, send one message, exit
//! - `listen`: Connect as a client and print inbound envelopes as JSON lines
//! - `health`: Query a broker's `/health` endpoint
//!
//! ## Example
//!
//! ```bash
//! # Watch what reaches the editor
//! tandem listen --as editor
//!
//! # Ask the editor to open a file
//! tandem send --as agent --type file_open --payload '{"filePath":"C:/test.ts","lineNumber":42}'
//!
//! # Broker health
//! tandem health --http 127.0.0.1:3004
//! ```

use anyhow::Result;
use bus_client::DEFAULT_URL;
use bus_types::ClientId;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{health, listen, send};

/// Operator CLI for the Tandem bus.
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Broker WebSocket URL
    #[arg(long, global = true, default_value = DEFAULT_URL)]
    url: String,

    /// Seconds to wait for the broker connection
    #[arg(long, global = true, default_value = "10")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message and exit
    Send {
        /// Identity to connect as (editor or agent)
        #[arg(long = "as", value_name = "CLIENT")]
        client: ClientId,

        /// Message type, e.g. file_open
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// Print inbound envelopes as JSON lines
    Listen {
        /// Identity to connect as (editor or agent)
        #[arg(long = "as", value_name = "CLIENT")]
        client: ClientId,

        /// Exit after this many envelopes
        #[arg(long)]
        count: Option<usize>,
    },

    /// Query broker health over HTTP
    Health {
        /// Broker HTTP address
        #[arg(long, default_value = "127.0.0.1:3004")]
        http: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `listen` output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Send {
            client,
            kind,
            payload,
        } => {
            send::run(&cli.url, client, &kind, &payload, timeout).await?;
        }
        Commands::Listen { client, count } => {
            listen::run(&cli.url, client, count, timeout).await?;
        }
        Commands::Health { http } => {
            health::run(&http).await?;
        }
    }

    Ok(())
}
