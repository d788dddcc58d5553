//! cproto-cli - Command-line interface for cproto servers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use cproto_client::{Client, ClientConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cproto-cli")]
#[command(about = "Command-line interface for cproto database servers")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "CPROTO_CONFIG")]
    config: Option<PathBuf>,

    /// Server address (overrides the config file)
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// Login user
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(short, long, env = "CPROTO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database to open on login
    #[arg(short, long)]
    database: Option<String>,

    /// Request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Ping the server
    Ping,

    /// Issue a raw call
    Call {
        /// Command name (e.g. select_sql) or numeric code
        command: String,

        /// Arguments: integers, floats, true/false, null, or strings
        args: Vec<String>,
    },

    /// Run an SQL query
    Select {
        /// SQL text
        query: String,

        /// Maximum rows per fetch
        #[arg(short, long, default_value = "100")]
        limit: i32,
    },

    /// List namespaces
    Namespaces,

    /// Read a namespace meta value
    GetMeta {
        namespace: String,
        key: String,
    },

    /// List meta keys of a namespace
    ListMeta { namespace: String },

    /// Print the effective client configuration
    ShowConfig,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        config.apply_env_overrides();

        if let Some(addr) = self.server {
            config.addr = addr;
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(timeout) = self.timeout {
            config.request_timeout_secs = timeout;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.client_config().map_err(|e| {
        eprintln!("{}: {}", "Configuration error".red(), e);
        e
    })?;

    // Handle show-config locally (no server connection needed)
    if let Some(Commands::ShowConfig) = &cli.command {
        let mut shown = config.clone();
        if !shown.password.is_empty() {
            shown.password = "********".to_string();
        }
        print!("{}", serde_yaml::to_string(&shown)?);
        return Ok(());
    }

    let client = Client::from_config(&config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, config.addr).await?;
        }
        Some(Commands::ShowConfig) => unreachable!(), // Already handled above
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            match commands::execute(&client, cmd).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    client.terminate();
                    std::process::exit(1);
                }
            }

            client.terminate();
        }
    }

    Ok(())
}
