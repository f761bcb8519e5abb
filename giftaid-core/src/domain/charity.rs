//! Charity domain model

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};

fn hmrc_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9-]{3,30}$").expect("static regex"))
}

/// Normalize and validate an HMRC charity reference (the CHARID key)
///
/// Trims, upper-cases, then requires 3 to 30 characters of `A-Z`, `0-9` or `-`.
pub fn normalize_hmrc_ref(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_uppercase();
    hmrc_ref_pattern()
        .is_match(&normalized)
        .then_some(normalized)
}

/// A charity that claims Gift Aid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charity {
    pub id: Uuid,
    pub name: String,
    pub contact_email: String,
    /// HMRC charity reference, sent as the CHARID key
    pub hmrc_ref: String,
    /// Secondary regulator number (e.g. Charity Commission registration)
    pub regulator_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Charity {
    /// The HMRC reference, re-checked at the point of use
    ///
    /// Stored rows may predate validation, so a blank or malformed value is a
    /// configuration problem rather than a user input problem.
    pub fn validated_hmrc_ref(&self) -> Result<String> {
        if self.hmrc_ref.trim().is_empty() {
            return Err(Error::configuration(format!(
                "charity '{}' has no HMRC reference",
                self.name
            )));
        }
        normalize_hmrc_ref(&self.hmrc_ref).ok_or_else(|| {
            Error::configuration(format!(
                "charity '{}' has an invalid HMRC reference '{}'",
                self.name, self.hmrc_ref
            ))
        })
    }
}

/// Request to register a charity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCharity {
    pub name: String,
    pub contact_email: String,
    pub hmrc_ref: String,
    #[serde(default)]
    pub regulator_number: Option<String>,
}

impl NewCharity {
    pub fn into_charity(self) -> Result<Charity> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation("name", "is required"));
        }

        let contact_email = self.contact_email.trim().to_string();
        if !contact_email.contains('@') {
            return Err(Error::validation("contact_email", "must be an email address"));
        }

        let hmrc_ref = normalize_hmrc_ref(&self.hmrc_ref).ok_or_else(|| {
            Error::validation(
                "hmrc_ref",
                "must be 3-30 characters of letters, digits or hyphens",
            )
        })?;

        let now = Utc::now();
        Ok(Charity {
            id: Uuid::new_v4(),
            name,
            contact_email,
            hmrc_ref,
            regulator_number: self
                .regulator_number
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            created_at: now,
            updated_at: now,
        })
    }
}
