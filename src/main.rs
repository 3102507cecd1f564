use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use packflow::config::{self, PackflowToml};
use packflow::logging::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "packflow")]
#[command(version, about = "Order management dashboard for a packaging plant")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to packflow.toml (defaults to ./.packflow/packflow.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the web dashboard
    Serve {
        /// Port to serve on (overrides packflow.toml)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS, bind on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Open the dashboard in a browser once the server is up
        #[arg(long)]
        open: bool,

        /// Keep orders in memory instead of the remote store
        #[arg(long)]
        memory: bool,
    },
    /// Inspect and move orders from the terminal
    Orders {
        #[command(subcommand)]
        command: OrdersCommands,
    },
    /// Manage dashboard logins
    Users {
        #[command(subcommand)]
        command: UsersCommands,
    },
    /// View or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum OrdersCommands {
    /// List orders, optionally narrowed to one stage
    List {
        #[arg(short, long)]
        stage: Option<String>,
        /// Free-text search over id, customer and item
        #[arg(long)]
        search: Option<String>,
    },
    /// Show one order as JSON
    Show { key: String },
    /// Move an order to its next stage
    Advance {
        key: String,
        /// Refuse unless the order is still in this stage
        #[arg(long)]
        expect: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum UsersCommands {
    /// Create or replace a user
    Add {
        username: String,
        /// admin, design, printing, lamination, diecut, assembly, packing or dispatch
        #[arg(short, long)]
        role: String,
        #[arg(short, long)]
        password: String,
        /// Display name used on slips and stamps
        #[arg(short, long)]
        name: Option<String>,
    },
    /// List users and their roles
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration and any warnings
    Show,
    /// Write a default packflow.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            config::default_config_path(&cwd)
        }
    };

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config_path, command.clone());
    }

    let settings = PackflowToml::load_or_default(&config_path)?.with_env_overrides();
    let _log_guard = logging::init(LogOptions {
        verbose: cli.verbose,
        json: cli.log_json || settings.logging.json,
        dir: settings.logging.dir.as_deref(),
    })?;
    tracing::debug!(config = %config_path.display(), "configuration loaded");

    match &cli.command {
        Commands::Serve {
            port,
            dev,
            open,
            memory,
        } => cmd::cmd_serve(settings, *port, *dev, *open, *memory).await?,
        Commands::Orders { command } => cmd::cmd_orders(settings, command.clone()).await?,
        Commands::Users { command } => cmd::cmd_users(settings, command.clone()).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
