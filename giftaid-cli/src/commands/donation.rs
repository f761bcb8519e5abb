//! Donation command - add, edit, remove and import donation rows

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use dialoguer::{Confirm, Input};

use giftaid_core::config::DonationColumns;
use giftaid_core::services::envelope::format_money;
use giftaid_core::services::ImportResult;
use giftaid_core::{DonationInput, DonationRecord};

use super::{emit, get_context, parse_id};
use crate::output;

/// Donor and donation fields; anything missing is prompted for on add
#[derive(Args)]
pub struct DonationFields {
    /// Donor title (Mr, Ms, Dr, ...)
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
    /// House name or number
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    postcode: Option<String>,
    /// Donation date (YYYY-MM-DD or DD/MM/YYYY)
    #[arg(long)]
    date: Option<String>,
    /// Amount in pounds, e.g. 25.50
    #[arg(long)]
    amount: Option<String>,
}

/// CSV header overrides for import
#[derive(Args)]
pub struct ColumnOverrides {
    #[arg(long)]
    title_column: Option<String>,
    #[arg(long)]
    first_name_column: Option<String>,
    #[arg(long)]
    last_name_column: Option<String>,
    #[arg(long)]
    address_column: Option<String>,
    #[arg(long)]
    postcode_column: Option<String>,
    #[arg(long)]
    date_column: Option<String>,
    #[arg(long)]
    amount_column: Option<String>,
}

impl ColumnOverrides {
    fn is_empty(&self) -> bool {
        self.title_column.is_none()
            && self.first_name_column.is_none()
            && self.last_name_column.is_none()
            && self.address_column.is_none()
            && self.postcode_column.is_none()
            && self.date_column.is_none()
            && self.amount_column.is_none()
    }

    fn apply(self, base: &DonationColumns) -> DonationColumns {
        DonationColumns {
            title: self.title_column.or_else(|| base.title.clone()),
            first_name: self.first_name_column.unwrap_or_else(|| base.first_name.clone()),
            last_name: self.last_name_column.unwrap_or_else(|| base.last_name.clone()),
            address: self.address_column.unwrap_or_else(|| base.address.clone()),
            postcode: self.postcode_column.unwrap_or_else(|| base.postcode.clone()),
            date: self.date_column.unwrap_or_else(|| base.date.clone()),
            amount: self.amount_column.unwrap_or_else(|| base.amount.clone()),
        }
    }
}

#[derive(Subcommand)]
pub enum DonationCommands {
    /// Add a donation row to a draft claim
    Add {
        claim_id: String,
        #[command(flatten)]
        fields: DonationFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a donation row on a draft claim
    Edit {
        claim_id: String,
        donation_id: String,
        #[command(flatten)]
        fields: DonationFields,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a donation row from a draft claim
    Remove {
        claim_id: String,
        donation_id: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import donation rows from CSV; all rows or none
    Import {
        claim_id: String,
        /// Path to CSV file
        file: PathBuf,
        /// Validate and show rows without importing
        #[arg(long)]
        preview: bool,
        #[command(flatten)]
        columns: ColumnOverrides,
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

impl DonationFields {
    fn prompt_missing(self) -> Result<DonationInput> {
        Ok(DonationInput {
            title: self.title,
            first_name: prompt(self.first_name, "First name")?,
            last_name: prompt(self.last_name, "Last name")?,
            address: prompt(self.address, "House name or number")?,
            postcode: prompt(self.postcode, "Postcode")?,
            donation_date: prompt(self.date, "Donation date")?,
            amount: prompt(self.amount, "Amount")?,
        })
    }

    /// Overlay the given fields on an existing row
    fn over(self, existing: &DonationRecord) -> DonationInput {
        DonationInput {
            title: self.title.or_else(|| existing.title.clone()),
            first_name: self.first_name.unwrap_or_else(|| existing.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| existing.last_name.clone()),
            address: self.address.unwrap_or_else(|| existing.address.clone()),
            postcode: self.postcode.unwrap_or_else(|| existing.postcode.clone()),
            donation_date: self.date.unwrap_or_else(|| existing.donation_date.to_string()),
            amount: self.amount.unwrap_or_else(|| existing.amount.to_string()),
        }
    }
}

fn print_row(record: &DonationRecord) {
    println!("  ID: {}", record.id);
    println!("  Donor: {} {}", record.first_name, record.last_name);
    println!("  Postcode: {}", record.postcode);
    println!("  Date: {}", record.donation_date);
    println!("  Amount: £{}", format_money(record.amount));
}

pub fn run(command: DonationCommands) -> Result<()> {
    let ctx = get_context()?;

    match command {
        DonationCommands::Add {
            claim_id,
            fields,
            json,
        } => {
            let claim_id = parse_id("claim", &claim_id)?;
            let input = fields.prompt_missing()?;
            emit(
                json,
                "donation add",
                ctx.lifecycle.add_donation(claim_id, &input),
                |record| {
                    println!("{}", "Donation added".green());
                    print_row(record);
                },
            )
        }
        DonationCommands::Edit {
            claim_id,
            donation_id,
            fields,
            json,
        } => {
            let claim_id = parse_id("claim", &claim_id)?;
            let donation_id = parse_id("donation", &donation_id)?;
            let existing = ctx
                .lifecycle
                .list_donations(claim_id)?
                .into_iter()
                .find(|d| d.id == donation_id)
                .ok_or_else(|| anyhow::anyhow!("Donation not found: {}", donation_id))?;
            let input = fields.over(&existing);
            emit(
                json,
                "donation edit",
                ctx.lifecycle.update_donation(claim_id, donation_id, &input),
                |record| {
                    println!("{}", "Donation updated".green());
                    print_row(record);
                },
            )
        }
        DonationCommands::Remove {
            claim_id,
            donation_id,
            force,
            json,
        } => {
            let claim_id = parse_id("claim", &claim_id)?;
            let donation_id = parse_id("donation", &donation_id)?;

            if !force && !json {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Remove donation {}?", donation_id))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            emit(
                json,
                "donation remove",
                ctx.lifecycle
                    .delete_donation(claim_id, donation_id)
                    .map(|_| serde_json::json!({ "removed": donation_id })),
                |_| output::success("Donation removed"),
            )
        }
        DonationCommands::Import {
            claim_id,
            file,
            preview,
            columns,
            json,
        } => {
            let claim_id = parse_id("claim", &claim_id)?;
            let columns = if columns.is_empty() {
                None
            } else {
                Some(columns.apply(ctx.import_service.columns()))
            };
            let result = ctx
                .import_service
                .import(&file, claim_id, columns.as_ref(), preview);
            let rejected = matches!(&result, Ok(r) if !r.errors.is_empty());
            emit(json, "donation import", result, print_import)?;
            if rejected {
                anyhow::bail!("Import rejected: fix the listed rows and try again");
            }
            Ok(())
        }
    }
}

fn print_import(result: &ImportResult) {
    if !result.errors.is_empty() {
        println!(
            "{}",
            format!(
                "{} of {} rows failed validation; nothing was imported",
                result.errors.len(),
                result.discovered
            )
            .as_str()
            .red()
        );
        let mut table = output::create_table();
        table.set_header(vec!["Line", "Field", "Problem"]);
        for e in &result.errors {
            table.add_row(vec![
                e.line.to_string(),
                e.field.clone().unwrap_or_default(),
                e.message.clone(),
            ]);
        }
        println!("{}", table);
        return;
    }

    if let Some(rows) = &result.donations {
        output::info(&format!("Preview: {} rows would be imported", rows.len()));
        let mut table = output::create_table();
        table.set_header(vec!["Donor", "Postcode", "Date", "Amount"]);
        for row in rows {
            table.add_row(vec![
                row.name.clone(),
                row.postcode.clone(),
                row.date.clone(),
                row.amount.clone(),
            ]);
        }
        println!("{}", table);
        return;
    }

    output::success(&format!("Imported {} donation rows", result.imported));
    if result.skipped > 0 {
        println!("  Skipped {} blank rows", result.skipped);
    }
}
