//! Launcher Keystore CLI
//!
//! Create, unlock and manage the launcher's encrypted accounts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launcher_keystore::{FileKeystore, LauncherConfig, PasswordCipher, SessionController};

mod commands;

#[derive(Parser)]
#[command(name = "launcher-keystore")]
#[command(about = "Launcher account keystore - create, unlock and manage accounts")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keystore directory (overrides the config file)
    #[arg(short, long, global = true)]
    keystore: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account
    Create,

    /// List known accounts
    List,

    /// Unlock an account
    Login {
        /// Account address (defaults to the first account)
        #[arg(short, long)]
        address: Option<String>,

        /// Print the decrypted private key
        #[arg(long)]
        show_key: bool,
    },

    /// Change an account's password
    ChangePassword {
        /// Account address (defaults to the first account)
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Restore an account from its raw private key under a new password
    Recover,

    /// Remove an account from the keystore
    Remove {
        /// Account address
        address: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = LauncherConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.keystore {
        config.keystore_dir = dir;
    }

    let repository = Arc::new(FileKeystore::open(&config.keystore_dir)?);
    let controller = SessionController::builder(repository)
        .cipher(PasswordCipher::new(config.kdf.clone())?)
        .throttle(config.throttle.clone())
        .build()?;

    match cli.command {
        Commands::Create => commands::create::run(&controller).await,
        Commands::List => commands::list::run(&controller, &config.keystore_dir).await,
        Commands::Login { address, show_key } => {
            commands::login::run(&controller, address.as_deref(), show_key).await
        }
        Commands::ChangePassword { address } => {
            commands::change_password::run(&controller, address.as_deref()).await
        }
        Commands::Recover => commands::recover::run(&controller).await,
        Commands::Remove { address, yes } => commands::remove::run(&controller, &address, yes).await,
    }
}
