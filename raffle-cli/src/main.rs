mod commands;
mod config;
mod coordinator;
mod keeper;
mod ledger;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "raffle")]
#[command(about = "Interval raffle with keeper-triggered draws and local randomness")]
#[command(version)]
struct Cli {
    /// Data directory for configuration, ledger and status
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },
    /// Credit a ledger account
    Fund {
        /// Account name
        account: String,
        /// Amount to credit
        amount: u64,
    },
    /// Make an account reject incoming transfers
    Block {
        /// Account name
        account: String,
    },
    /// Let a blocked account receive transfers again
    Unblock {
        /// Account name
        account: String,
    },
    /// Show ledger balances
    Balances,
    /// Show recent ledger transfers
    History {
        /// Number of transfers to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Run raffle rounds with a local keeper and randomness coordinator
    Run {
        /// Participant entering every round (repeat for more entries)
        #[arg(short, long = "entry", required = true)]
        entries: Vec<String>,
        /// Number of rounds to run
        #[arg(short, long, default_value_t = 1)]
        rounds: u32,
        /// Seconds to wait for each round to resolve
        #[arg(long, default_value_t = 120)]
        round_timeout: u64,
    },
    /// Show the outcome of the last run
    Status,
    /// Delete the ledger and the saved status
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "raffle_cli={},raffle_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    tokio::fs::create_dir_all(&data_dir).await?;

    let result = match cli.command {
        Commands::Init { force } => commands::init(&data_dir, force),
        Commands::Fund { account, amount } => commands::fund(&data_dir, &account, amount).await,
        Commands::Block { account } => commands::set_blocked(&data_dir, &account, true).await,
        Commands::Unblock { account } => commands::set_blocked(&data_dir, &account, false).await,
        Commands::Balances => commands::show_balances(&data_dir).await,
        Commands::History { limit } => commands::show_history(&data_dir, limit).await,
        Commands::Run {
            entries,
            rounds,
            round_timeout,
        } => {
            commands::run(
                &data_dir,
                &entries,
                rounds,
                Duration::from_secs(round_timeout),
            )
            .await
        }
        Commands::Status => commands::show_status(&data_dir),
        Commands::Reset { force } => commands::reset(&data_dir, force).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
