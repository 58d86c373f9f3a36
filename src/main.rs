use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "locshare", about = "Offline-tolerant location and battery sharing")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub server
    Hub,

    /// Start the telemetry agent (default)
    Agent,

    /// Authentication management
    Auth {
        #[command(subcommand)]
        action: Option<AuthAction>,
    },

    /// List connected peers with their latest telemetry
    Peers,

    /// Show your own telemetry history
    History {
        /// How many hours back to look
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
}

#[derive(Subcommand)]
enum AuthAction {
    /// Show current configuration
    Status,
    /// Enter and save the hub auth token
    Login,
    /// Clear saved credentials
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Hub) => locshare_hub::run_hub().await,
        Some(Commands::Auth { action }) => locshare_client::auth::run(action.map(|a| match a {
            AuthAction::Status => "status",
            AuthAction::Login => "login",
            AuthAction::Logout => "logout",
        })),
        Some(Commands::Peers) => locshare_client::view::show_peers().await,
        Some(Commands::History { hours }) => locshare_client::view::show_history(hours).await,
        Some(Commands::Agent) | None => locshare_client::run_agent().await,
    }
}
