//! giftaid CLI - prepare and submit Gift Aid claims from your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{charity, claim, donation, gateway, logs};

/// giftaid - prepare Gift Aid claims and submit them to the Government Gateway
#[derive(Parser)]
#[command(name = "giftaid", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register and list charities
    Charity {
        #[command(subcommand)]
        command: charity::CharityCommands,
    },

    /// Create claims and move them through draft, ready and submitted
    Claim {
        #[command(subcommand)]
        command: claim::ClaimCommands,
    },

    /// Manage donation rows on a draft claim
    Donation {
        #[command(subcommand)]
        command: donation::DonationCommands,
    },

    /// Manage gateway credentials
    Gateway {
        #[command(subcommand)]
        command: gateway::GatewayCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Charity { command } => charity::run(command),
        Commands::Claim { command } => claim::run(command),
        Commands::Donation { command } => donation::run(command),
        Commands::Gateway { command } => gateway::run(command),
        Commands::Logs { command } => logs::run(command),
    }
}
