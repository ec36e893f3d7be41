//! bidi-cli - Command-line interface for bidi
//!
//! Runs one request per invocation with the identity of a credential bundle.

mod commands;

use bidi_client::{Client, ClientConfiguration, ClientHandler};
use bidi_protocol::{Notification, Payload};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bidi-cli")]
#[command(about = "Command-line interface for a bidi server")]
#[command(version)]
struct Cli {
    /// Credential bundle of the acting user
    #[arg(short, long, env = "BIDI_BUNDLE")]
    config: Option<PathBuf>,

    /// Client build reported to the server
    #[arg(long, env = "BIDI_CLIENT_BUILD")]
    build: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ping the server
    Ping,

    /// Show server status
    Status,

    /// Print the server's current log file
    Log,

    /// Change the server's log level
    SetLogLevel {
        /// Verbose, Information, Warning, Error, Critical or General
        level: String,
    },

    /// List all users
    Users,

    /// Show one user
    User {
        /// User ID
        id: String,
    },

    /// Create a user; prints the activation data
    CreateUser {
        /// User ID
        id: String,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Custom data entries (key=value, comma separated)
        #[arg(short, long, value_delimiter = ',')]
        data: Vec<String>,

        /// Write the activation data to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Replace a user's name and custom data
    UpdateUser {
        /// User ID
        id: String,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,

        /// Custom data entries (key=value, comma separated)
        #[arg(short, long, value_delimiter = ',')]
        data: Vec<String>,
    },

    /// Issue new credentials for a user; prints the activation data
    RenewUser {
        /// User ID
        id: String,

        /// Write the activation data to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete a user
    DeleteUser {
        /// User ID
        id: String,
    },

    /// Activate a user from its activation data and write its bundle
    Activate {
        /// Activation data written by create-user or renew-user
        activation: PathBuf,

        /// Where to write the bundle (defaults to <userId>_<url>_<port>)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the data sets a user has access to
    Datasets {
        /// User ID (defaults to the acting user)
        user: Option<String>,
    },

    /// Create a data set
    CreateDataset {
        /// Data set ID
        id: String,

        /// Authorized users (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        users: Vec<String>,
    },

    /// Show one data set
    GetDataset {
        /// Data set ID
        id: String,
    },

    /// Delete a data set
    DeleteDataset {
        /// Data set ID
        id: String,
    },

    /// Push a text notification
    Push {
        /// Recipients (comma separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        to: Vec<String>,

        /// Notification text
        text: String,
    },

    /// Print notifications as they arrive until Ctrl+C
    Listen,

    /// Stop the server
    Shutdown,
}

/// Prints every delivered notification as one JSON line.
struct Printer;

impl ClientHandler for Printer {
    fn on_notification(&self, notification: &Notification, payload: Option<Payload>) {
        let json = payload.as_ref().and_then(|p| p.json().cloned());
        let line = serde_json::json!({
            "id": notification.id,
            "sender": notification.sender,
            "date_created": notification.date_created,
            "payload": json,
        });
        println!("{}", line);
    }

    fn on_connection_status_changed(&self, connected: bool) {
        if connected {
            eprintln!("{}", "Notification channel open".green());
        } else {
            eprintln!("{}", "Notification channel lost, reconnecting...".yellow());
        }
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

    // Activation runs under its own identity
    if let Commands::Activate { activation, out } = &cli.command {
        match commands::activate(activation, out.as_deref(), cli.build.clone()).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let Some(path) = cli.config else {
        eprintln!("{}: --config <bundle> is required", "Error".red());
        std::process::exit(1);
    };
    let bundle = ClientConfiguration::read_from_file(&path).map_err(|e| {
        eprintln!("{}: {}: {}", "Cannot read bundle".red(), path.display(), e);
        e
    })?;

    let handler: Arc<dyn ClientHandler> = match cli.command {
        Commands::Listen => Arc::new(Printer),
        _ => Arc::new(bidi_client::DefaultClientHandler::with_build(cli.build.clone())),
    };
    let client = Arc::new(Client::new(bundle, handler)?);

    if let Commands::Listen = cli.command {
        if !client.start() {
            eprintln!(
                "{}: user {} does not receive notifications",
                "Error".red(),
                client.user_id()
            );
            std::process::exit(1);
        }
        eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
        tokio::signal::ctrl_c().await?;
        eprintln!("\n{}", "Disconnecting...".dimmed());
        let _ = client.disconnect().await;
        return Ok(());
    }

    match commands::execute(&client, cli.command).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
