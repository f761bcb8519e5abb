//! Donation validation
//!
//! Runs at data entry (manual add, CSV import) and again inside the envelope
//! builder. Both paths share the same field rules.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::{DonationInput, DonationRecord, ValidDonation};

/// Date formats accepted at the boundary, tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Largest single donation the store holds (`DECIMAL(12, 2)`)
pub fn max_donation_amount() -> Decimal {
    Decimal::new(9_999_999_999_99, 2)
}

/// Largest claim total the store holds (`DECIMAL(18, 2)`)
pub fn max_claim_total() -> Decimal {
    Decimal::new(9_999_999_999_999_999_99, 2)
}

/// Validate a raw donation row
pub fn validate_donation(input: &DonationInput) -> Result<ValidDonation> {
    let first_name = required_text("first_name", &input.first_name)?;
    let last_name = required_text("last_name", &input.last_name)?;
    let address = required_text("address", &input.address)?;
    let postcode = normalize_postcode(&input.postcode)?;
    let donation_date = parse_donation_date(&input.donation_date)?;
    let amount = parse_amount(&input.amount)?;

    let title = input
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(ValidDonation {
        title,
        first_name,
        last_name,
        address,
        postcode,
        donation_date,
        amount,
    })
}

/// Re-check a stored record before it is rendered
///
/// Returns the postcode in normalized form so the renderer never emits a
/// value that skipped normalization.
pub fn validate_record(record: &DonationRecord) -> Result<String> {
    required_text("first_name", &record.first_name)?;
    required_text("last_name", &record.last_name)?;
    required_text("address", &record.address)?;
    let postcode = normalize_postcode(&record.postcode)?;
    check_amount(record.amount)?;
    Ok(postcode)
}

/// Trim and upper-case a postcode; blank is an error
pub fn normalize_postcode(raw: &str) -> Result<String> {
    let postcode = raw.trim().to_uppercase();
    if postcode.is_empty() {
        return Err(Error::validation("postcode", "is required"));
    }
    Ok(postcode)
}

/// Parse a donation date in ISO or UK day-first form
pub fn parse_donation_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("donation_date", "is required"));
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            Error::validation(
                "donation_date",
                format!("'{}' is not a calendar date", trimmed),
            )
        })
}

/// Parse a money amount such as `25.50`, `£1,000` or `10`
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('£')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if cleaned.is_empty() {
        return Err(Error::validation("amount", "is required"));
    }
    let amount = Decimal::from_str(&cleaned).map_err(|_| {
        Error::validation("amount", format!("'{}' is not a number", raw.trim()))
    })?;
    check_amount(amount)?;
    Ok(amount)
}

fn check_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::validation("amount", "must be greater than zero"));
    }
    if amount.normalize().scale() > 2 {
        return Err(Error::validation(
            "amount",
            "must not have more than two decimal places",
        ));
    }
    if amount > max_donation_amount() {
        return Err(Error::validation(
            "amount",
            format!("must not exceed {}", max_donation_amount()),
        ));
    }
    Ok(())
}

/// A claim total must fit the frozen total column
pub fn check_claim_total(total: Decimal) -> Result<()> {
    if total > max_claim_total() {
        return Err(Error::state(format!(
            "claim total {} exceeds the largest total that can be frozen ({})",
            total,
            max_claim_total()
        )));
    }
    Ok(())
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::validation(field, "is required"));
    }
    Ok(trimmed.to_string())
}
