//! Charity command - register and list charities

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Input;

use giftaid_core::NewCharity;

use super::{emit, get_context};
use crate::output;

#[derive(Subcommand)]
pub enum CharityCommands {
    /// Register a charity
    Add {
        /// Charity name
        #[arg(long)]
        name: Option<String>,
        /// Contact email address
        #[arg(long)]
        email: Option<String>,
        /// HMRC charity reference
        #[arg(long)]
        hmrc_ref: Option<String>,
        /// Regulator registration number
        #[arg(long)]
        regulator_number: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered charities
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn prompt(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => Ok(Input::new().with_prompt(label).interact_text()?),
    }
}

pub fn run(command: CharityCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        CharityCommands::Add {
            name,
            email,
            hmrc_ref,
            regulator_number,
            json,
        } => {
            let request = NewCharity {
                name: prompt(name, "Charity name")?,
                contact_email: prompt(email, "Contact email")?,
                hmrc_ref: prompt(hmrc_ref, "HMRC reference")?,
                regulator_number,
            };
            emit(json, "charity add", ctx.charity_service.register(request), |charity| {
                println!("{}", "Charity registered".green());
                println!("  ID: {}", charity.id);
                println!("  Name: {}", charity.name);
                println!("  HMRC ref: {}", charity.hmrc_ref);
            })
        }
        CharityCommands::List { json } => {
            emit(json, "charity list", ctx.charity_service.list(), |charities| {
                if charities.is_empty() {
                    output::info("No charities registered. Add one with 'giftaid charity add'.");
                    return;
                }
                let mut table = output::create_table();
                table.set_header(vec!["ID", "Name", "HMRC ref", "Regulator no.", "Email"]);
                for c in charities {
                    table.add_row(vec![
                        c.id.to_string(),
                        c.name.clone(),
                        c.hmrc_ref.clone(),
                        c.regulator_number.clone().unwrap_or_default(),
                        c.contact_email.clone(),
                    ]);
                }
                println!("{}", table);
            })
        }
    }
}
