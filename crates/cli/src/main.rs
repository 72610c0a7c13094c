mod catalog_cmd;
mod chat;
mod config_cmd;
mod context;
mod output;
mod servers;
mod sessions_cmd;
mod settings_cmd;

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opencode2go_core::{PartKind, PermissionLevel};

use crate::chat::{Selection, WaitPolicy, parse_kind};
use crate::context::Context;

#[derive(Parser)]
#[command(
    name = "opencode2go",
    version,
    about = "Chat with opencode servers from the terminal"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage known servers
    Servers {
        #[command(subcommand)]
        action: servers::ServersAction,
    },

    /// Probe the configured hosts and ports for running servers
    Discover,

    /// List sessions of the active server
    Sessions {
        /// Sessions of every known server, newest first
        #[arg(long)]
        all: bool,
        /// Indent child sessions under their parent
        #[arg(long, conflicts_with = "all")]
        tree: bool,
    },

    /// Create a session and print its id
    New,

    /// Delete a session
    Delete { session: String },

    /// Print the messages of a session (the most recent one by default)
    History {
        session: Option<String>,
        /// Only show these part kinds, e.g. `text,tool`
        #[arg(long, value_parser = parse_kind, value_delimiter = ',')]
        filter: Vec<PartKind>,
    },

    /// Send a message
    Send {
        text: String,
        /// Target session, the most recent one by default
        #[arg(long, short)]
        session: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        /// Stream the reply
        #[arg(long, short)]
        wait: bool,
        /// Seconds of silence after a reply that end `--wait`
        #[arg(long, default_value_t = 5, requires = "wait")]
        idle: u64,
        /// Upper bound for `--wait` in seconds
        #[arg(long, default_value_t = 300, requires = "wait")]
        timeout: u64,
    },

    /// Follow a session live
    Watch { session: Option<String> },

    /// List providers and models of the active server
    Providers,

    /// List modes of the active server
    Modes,

    /// Push the edit/bash permission policy to the active server
    Permissions {
        #[arg(long)]
        edit: Option<PermissionLevel>,
        #[arg(long)]
        bash: Option<PermissionLevel>,
    },

    /// Show or change `opencode2go.toml`
    Config(config_cmd::ConfigArgs),

    /// Show or change appearance and part filter settings
    Settings {
        #[command(subcommand)]
        action: Option<settings_cmd::SettingsAction>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config still gets logging with the built-in default.
    let config = opencode2go_paths::load_config();
    let default_filter = config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: opencode2go_runtime_config::ClientConfig) -> anyhow::Result<()> {
    if let Commands::Config(args) = command {
        return config_cmd::run(args);
    }
    let ctx = Context::load(config)?;
    match command {
        Commands::Servers { action } => servers::run(&ctx, action),
        Commands::Discover => servers::discover(&ctx).await,
        Commands::Sessions { all, tree } => sessions_cmd::list(&ctx, all, tree).await,
        Commands::New => sessions_cmd::create(&ctx).await,
        Commands::Delete { session } => sessions_cmd::delete(&ctx, &session).await,
        Commands::History { session, filter } => {
            chat::history(&ctx, session.as_deref(), &filter).await
        }
        Commands::Send {
            text,
            session,
            provider,
            model,
            mode,
            wait,
            idle,
            timeout,
        } => {
            let selection = Selection {
                provider,
                model,
                mode,
            };
            let wait = wait.then(|| WaitPolicy {
                idle: Duration::from_secs(idle),
                timeout: Duration::from_secs(timeout),
            });
            chat::send(&ctx, session.as_deref(), &text, &selection, wait).await
        }
        Commands::Watch { session } => chat::watch(&ctx, session.as_deref()).await,
        Commands::Providers => catalog_cmd::providers(&ctx).await,
        Commands::Modes => catalog_cmd::modes(&ctx).await,
        Commands::Permissions { edit, bash } => catalog_cmd::permissions(&ctx, edit, bash).await,
        Commands::Settings { action } => settings_cmd::run(&ctx, action),
        Commands::Config(_) => Ok(()),
    }
}
