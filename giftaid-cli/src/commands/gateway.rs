//! Gateway command - store and inspect per-charity gateway credentials

use std::env;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::{Input, Password};
use serde::Serialize;

use giftaid_core::{CredentialMode, GatewayConnection, GatewayCredentials};

use super::{emit, get_context, parse_id};
use crate::output;

/// Environment variable read before prompting for the gateway password
const PASSWORD_ENV: &str = "GIFTAID_GATEWAY_PASSWORD";

#[derive(Subcommand)]
pub enum GatewayCommands {
    /// Store credentials for a charity, replacing the active set
    Set {
        charity_id: String,
        /// Government Gateway sender ID
        #[arg(long)]
        sender_id: Option<String>,
        /// Who holds the credentials: charity or central
        #[arg(long, default_value = "charity")]
        mode: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the active connection and its history
    Status {
        charity_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Connection metadata; the sealed credentials are never printed
#[derive(Serialize)]
struct ConnectionSummary {
    id: String,
    mode: CredentialMode,
    is_active: bool,
    created_at: String,
    deactivated_at: Option<String>,
}

impl From<&GatewayConnection> for ConnectionSummary {
    fn from(c: &GatewayConnection) -> Self {
        Self {
            id: c.id.to_string(),
            mode: c.mode,
            is_active: c.is_active,
            created_at: c.created_at.to_rfc3339(),
            deactivated_at: c.deactivated_at.map(|d| d.to_rfc3339()),
        }
    }
}

/// Get password from GIFTAID_GATEWAY_PASSWORD or prompt
fn get_password_or_prompt() -> Result<String> {
    if let Ok(p) = env::var(PASSWORD_ENV) {
        return Ok(p);
    }
    Ok(Password::new()
        .with_prompt("Gateway password")
        .interact()?)
}

pub fn run(command: GatewayCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        GatewayCommands::Set {
            charity_id,
            sender_id,
            mode,
            json,
        } => {
            let charity_id = parse_id("charity", &charity_id)?;
            let mode: CredentialMode = mode.parse()?;
            let sender_id = match sender_id {
                Some(s) => s,
                None => Input::new().with_prompt("Sender ID").interact_text()?,
            };
            let credentials = GatewayCredentials::new(sender_id, get_password_or_prompt()?)?;

            let result = ctx
                .gateway_service
                .activate(charity_id, mode, &credentials)
                .map(|c| ConnectionSummary::from(&c));
            emit(json, "gateway set", result, |summary| {
                println!("{}", "Gateway credentials stored".green());
                println!("  Connection: {}", summary.id);
                println!("  Mode: {}", summary.mode.as_str());
            })
        }
        GatewayCommands::Status { charity_id, json } => {
            let charity_id = parse_id("charity", &charity_id)?;
            let result = ctx
                .gateway_service
                .history(charity_id)
                .map(|h| h.iter().map(ConnectionSummary::from).collect::<Vec<_>>());
            emit(json, "gateway status", result, |history| {
                if history.is_empty() {
                    output::warning("No gateway credentials stored for this charity.");
                    return;
                }
                let mut table = output::create_table();
                table.set_header(vec!["Connection", "Mode", "Active", "Created", "Deactivated"]);
                for c in history {
                    table.add_row(vec![
                        c.id.clone(),
                        c.mode.as_str().to_string(),
                        if c.is_active { "yes".to_string() } else { String::new() },
                        c.created_at.clone(),
                        c.deactivated_at.clone().unwrap_or_default(),
                    ]);
                }
                println!("{}", table);
            })
        }
    }
}
