mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::profile::ProfileSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "refresh",
    about = "Keep directory profiles fresh: schedule, run and audit profile maintenance",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: nearest directory containing .refresh/)
    #[arg(long, global = true, env = "REFRESH_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .refresh/ with a default config and recipients file
    Init {
        /// age public key to add to the recipients file
        #[arg(long)]
        recipient: Option<String>,
    },

    /// Run the HTTP control surface
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,

        /// Start the scheduler loop immediately
        #[arg(long)]
        start: bool,
    },

    /// Manage profiles
    Profile {
        #[command(subcommand)]
        subcommand: ProfileSubcommand,
    },

    /// Run one maintenance pass over every active profile and exit
    RunOnce,

    /// Show update logs, newest first
    Logs {
        /// Profile id or username
        #[arg(long)]
        profile: Option<String>,

        /// Success, Failure, NoChange or Warning
        #[arg(long)]
        outcome: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show profile statuses and recent outcome counts
    Status,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { recipient } => cmd::init::run(&root, recipient.as_deref()),
        Commands::Serve { port, start } => cmd::serve::run(&root, port, start),
        Commands::Profile { subcommand } => cmd::profile::run(&root, subcommand, cli.json),
        Commands::RunOnce => cmd::run_once::run(&root, cli.json),
        Commands::Logs {
            profile,
            outcome,
            limit,
        } => cmd::logs::run(&root, profile.as_deref(), outcome.as_deref(), limit, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
