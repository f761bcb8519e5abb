//! Claim command - create, inspect and move claims through their lifecycle

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::Subcommand;
use colored::Colorize;

use giftaid_core::services::envelope::format_money;
use giftaid_core::services::{ClaimDetail, PollResult, SubmitResult};
use giftaid_core::{Claim, NewClaim};

use super::{emit, get_context, parse_id};
use crate::output;

#[derive(Subcommand)]
pub enum ClaimCommands {
    /// Open a draft claim
    New {
        /// Charity ID
        #[arg(long)]
        charity_id: String,
        /// First day of the claim period (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// Last day of the claim period (YYYY-MM-DD)
        #[arg(long)]
        end: String,
        /// Tax year label, e.g. 2024-25
        #[arg(long)]
        tax_year: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List claims
    List {
        /// Only claims for this charity
        #[arg(long)]
        charity_id: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a claim with its donation rows
    Show {
        claim_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Freeze a draft claim so it can be submitted
    Ready {
        claim_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render the submission envelope without sending it
    Render {
        claim_id: String,
        /// Write the XML to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Send a ready claim to the gateway
    Submit {
        claim_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the gateway for the result of a submitted claim
    Poll {
        claim_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid date '{}'. Use YYYY-MM-DD", raw))
}

fn print_claim(claim: &Claim) {
    println!("  ID: {}", claim.id);
    println!("  Status: {}", output::status_label(claim.status));
    println!("  Period: {} to {}", claim.period_start, claim.period_end);
    if let Some(tax_year) = &claim.tax_year {
        println!("  Tax year: {}", tax_year);
    }
    if claim.status != giftaid_core::ClaimStatus::Draft {
        println!("  Donations: {}", claim.donation_count);
        println!("  Total: £{}", format_money(claim.total_amount));
    }
    if let Some(correlation_id) = &claim.correlation_id {
        println!("  Correlation ID: {}", correlation_id);
    }
    if let Some(message) = &claim.last_message {
        println!("  Last message: {}", message);
    }
}

pub fn run(command: ClaimCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        ClaimCommands::New {
            charity_id,
            start,
            end,
            tax_year,
            json,
        } => {
            let request = NewClaim {
                charity_id: parse_id("charity", &charity_id)?,
                period_start: parse_date(&start)?,
                period_end: parse_date(&end)?,
                tax_year,
            };
            emit(json, "claim new", ctx.lifecycle.create_claim(request), |claim| {
                println!("{}", "Draft claim created".green());
                print_claim(claim);
            })
        }
        ClaimCommands::List { charity_id, json } => {
            let charity_id = charity_id
                .map(|id| parse_id("charity", &id))
                .transpose()?;
            emit(json, "claim list", ctx.lifecycle.list_claims(charity_id), |claims| {
                if claims.is_empty() {
                    output::info("No claims found.");
                    return;
                }
                let mut table = output::create_table();
                table.set_header(vec!["ID", "Period", "Tax year", "Status", "Rows", "Total"]);
                for c in claims {
                    table.add_row(vec![
                        c.id.to_string(),
                        format!("{} to {}", c.period_start, c.period_end),
                        c.tax_year.clone().unwrap_or_default(),
                        output::status_label(c.status).to_string(),
                        c.donation_count.to_string(),
                        format_money(c.total_amount),
                    ]);
                }
                println!("{}", table);
            })
        }
        ClaimCommands::Show { claim_id, json } => {
            let id = parse_id("claim", &claim_id)?;
            emit(
                json,
                "claim show",
                ctx.lifecycle.claim_with_donations(id),
                |detail: &ClaimDetail| {
                    println!("{}", format!("Claim for {}", detail.charity.name).as_str().bold());
                    print_claim(&detail.claim);
                    println!();

                    if detail.donations.is_empty() {
                        output::info("No donation rows yet.");
                        return;
                    }
                    let mut table = output::create_table();
                    table.set_header(vec!["#", "ID", "Donor", "Postcode", "Date", "Amount"]);
                    for d in &detail.donations {
                        let donor = match &d.title {
                            Some(title) => format!("{} {} {}", title, d.first_name, d.last_name),
                            None => format!("{} {}", d.first_name, d.last_name),
                        };
                        table.add_row(vec![
                            d.position.to_string(),
                            d.id.to_string(),
                            donor,
                            d.postcode.clone(),
                            d.donation_date.to_string(),
                            format_money(d.amount),
                        ]);
                    }
                    println!("{}", table);
                },
            )
        }
        ClaimCommands::Ready { claim_id, json } => {
            let id = parse_id("claim", &claim_id)?;
            emit(json, "claim ready", ctx.lifecycle.transition_to_ready(id), |claim| {
                println!("{}", "Claim is ready to submit".green());
                print_claim(claim);
            })
        }
        ClaimCommands::Render { claim_id, output: path } => {
            let id = parse_id("claim", &claim_id)?;
            let xml = ctx.lifecycle.render_envelope(id)?;
            match path {
                Some(path) => {
                    std::fs::write(&path, &xml)?;
                    output::success(&format!("Envelope written to {}", path.display()));
                }
                None => print!("{}", xml),
            }
            Ok(())
        }
        ClaimCommands::Submit { claim_id, json } => {
            let id = parse_id("claim", &claim_id)?;
            emit(json, "claim submit", ctx.lifecycle.submit(id), |result: &SubmitResult| {
                if result.outcome.success {
                    output::success("Claim submitted");
                } else {
                    output::warning("Claim marked submitted, but the gateway call failed");
                }
                print_claim(&result.claim);
            })
        }
        ClaimCommands::Poll { claim_id, json } => {
            let id = parse_id("claim", &claim_id)?;
            emit(json, "claim poll", ctx.lifecycle.poll(id), |result: &PollResult| {
                if result.status_changed {
                    output::success(&format!("Claim is now {}", result.claim.status));
                } else {
                    output::info(&result.message);
                }
                print_claim(&result.claim);
            })
        }
    }
}
