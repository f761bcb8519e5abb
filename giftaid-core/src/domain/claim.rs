//! Claim domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::result::{Error, Result};

/// Where a claim is in its lifecycle
///
/// Ordering matters: anything at or past `Submitted` is frozen for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Draft,
    Ready,
    Submitted,
    Accepted,
    Rejected,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Draft => "draft",
            ClaimStatus::Ready => "ready",
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::Accepted => "accepted",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Failed => "failed",
        }
    }

    /// Terminal acknowledgement states reached through polling
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Accepted | ClaimStatus::Rejected | ClaimStatus::Failed
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ClaimStatus::Draft),
            "ready" => Ok(ClaimStatus::Ready),
            "submitted" => Ok(ClaimStatus::Submitted),
            "accepted" => Ok(ClaimStatus::Accepted),
            "rejected" => Ok(ClaimStatus::Rejected),
            "failed" => Ok(ClaimStatus::Failed),
            other => Err(Error::Database(format!("unknown claim status '{}'", other))),
        }
    }
}

/// A Gift Aid repayment claim for one charity and one period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: Uuid,
    pub charity_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Free-form label such as "2024-25"
    pub tax_year: Option<String>,
    pub status: ClaimStatus,
    /// Frozen when the claim is marked ready
    pub donation_count: i64,
    /// Frozen when the claim is marked ready
    pub total_amount: Decimal,
    pub correlation_id: Option<String>,
    pub last_message: Option<String>,
    /// Raw gateway response body, kept for audit
    pub last_response: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// Create a new draft claim
    pub fn new(charity_id: Uuid, period_start: NaiveDate, period_end: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            charity_id,
            period_start,
            period_end,
            tax_year: None,
            status: ClaimStatus::Draft,
            donation_count: 0,
            total_amount: Decimal::ZERO,
            correlation_id: None,
            last_message: None,
            last_response: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Correlation id derived from the claim id alone
    ///
    /// Re-submitting the same claim always produces the same value.
    pub fn derived_correlation_id(&self) -> String {
        derive_correlation_id(self.id)
    }
}

/// Uppercase hex of the first 16 bytes of SHA-256(claim id)
pub fn derive_correlation_id(claim_id: Uuid) -> String {
    let digest = Sha256::digest(claim_id.to_string().as_bytes());
    hex::encode_upper(&digest[..16])
}

/// Request to open a new claim
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClaim {
    pub charity_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub tax_year: Option<String>,
}

impl NewClaim {
    /// Validate the request and produce a draft claim
    pub fn into_claim(self) -> Result<Claim> {
        if self.period_start > self.period_end {
            return Err(Error::validation(
                "period_end",
                format!(
                    "period end {} is before period start {}",
                    self.period_end, self.period_start
                ),
            ));
        }

        let mut claim = Claim::new(self.charity_id, self.period_start, self.period_end);
        claim.tax_year = self
            .tax_year
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        Ok(claim)
    }
}
