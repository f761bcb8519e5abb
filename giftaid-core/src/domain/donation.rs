//! Donation record domain model

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One donor/donation row owned by a claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DonationRecord {
    pub id: Uuid,
    pub claim_id: Uuid,
    /// Insertion order within the claim; rows render in this order
    pub position: i64,
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    /// House name or number / first address line
    pub address: String,
    /// Always stored trimmed and upper-cased
    pub postcode: String,
    pub donation_date: NaiveDate,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw donation row as entered by a user or read from a CSV file
///
/// Nothing here is trusted; it becomes a [`ValidDonation`] only through
/// `services::validation::validate_donation`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationInput {
    #[serde(default)]
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub postcode: String,
    pub donation_date: String,
    pub amount: String,
}

/// A donation row that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDonation {
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub postcode: String,
    pub donation_date: NaiveDate,
    pub amount: Decimal,
}

impl ValidDonation {
    /// Materialize as a record owned by `claim_id`
    ///
    /// The position is assigned by the repository on insert.
    pub fn into_record(self, claim_id: Uuid) -> DonationRecord {
        let now = Utc::now();
        DonationRecord {
            id: Uuid::new_v4(),
            claim_id,
            position: 0,
            title: self.title,
            first_name: self.first_name,
            last_name: self.last_name,
            address: self.address,
            postcode: self.postcode,
            donation_date: self.donation_date,
            amount: self.amount,
            created_at: now,
            updated_at: now,
        }
    }
}
