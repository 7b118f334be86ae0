//! Taskboard CLI - Account and profile management from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Sign in (password read from TASKBOARD_PASSWORD or stdin)
//! tb login -e hana@example.com
//!
//! # Register a new account
//! tb signup -e ivan@example.com -n "Ivan"
//!
//! # Show who is signed in
//! tb whoami
//!
//! # Edit the profile
//! tb profile set --name "Ivan P." --avatar-url https://cdn.example.com/ivan.png
//! tb profile set --clear-avatar
//!
//! # Print every state change until Ctrl-C
//! tb watch
//!
//! # Sign out
//! tb logout
//! ```
//!
//! # Environment Variables
//!
//! Connection settings are read by `HostedConfig::from_env`. In addition:
//!
//! - `TASKBOARD_PASSWORD` - Password for `login`/`signup` (otherwise read from stdin)
//! - `TASKBOARD_LOG_JSON` - Emit logs as JSON when set
//! - `SENTRY_DSN` - Report warnings and errors to Sentry when set
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tb")]
#[command(author, version, about = "Taskboard account tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
    /// Register a new account
    Signup {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Sign out
    Logout,
    /// Show the signed-in identity and profile
    Whoami,
    /// Manage the profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Print state changes until interrupted
    Watch,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Update profile fields
    Set {
        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New avatar URL
        #[arg(long, conflicts_with = "clear_avatar")]
        avatar_url: Option<String>,

        /// Remove the avatar
        #[arg(long)]
        clear_avatar: bool,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|d| !d.is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("SENTRY_ENVIRONMENT")
                .ok()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry();

    // Quiet by default; RUST_LOG=taskboard_session=debug for details
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taskboard_session=warn,taskboard_cli=info".into());

    let is_json = std::env::var("TASKBOARD_LOG_JSON").is_ok();
    // Logs go to stderr; stdout is for command output
    let json_layer = is_json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
    });
    let text_layer =
        (!is_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    let store = commands::connect().await?;

    match cli.command {
        Commands::Login { email } => commands::account::login(&store, &email).await,
        Commands::Signup { email, name } => commands::account::signup(&store, &email, &name).await,
        Commands::Logout => commands::account::logout(&store).await,
        Commands::Whoami => {
            commands::account::whoami(&store);
            Ok(())
        }
        Commands::Profile { action } => match action {
            ProfileAction::Set {
                name,
                avatar_url,
                clear_avatar,
            } => commands::profile::set(&store, name, avatar_url, clear_avatar).await,
        },
        Commands::Watch => commands::watch::run(&store).await,
    }
}
