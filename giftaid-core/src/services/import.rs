//! Import service - CSV donation import
//!
//! Every row is validated before anything is stored. One bad row means no
//! rows are imported.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use csv::StringRecord;
use serde::Serialize;
use uuid::Uuid;

use crate::config::DonationColumns;
use crate::domain::result::{Error, Result};
use crate::domain::{ClaimStatus, DonationInput, ValidDonation};

use super::envelope::{format_date, format_money};
use super::lifecycle::ClaimLifecycle;
use super::validation::validate_donation;

/// Import service for CSV imports
pub struct ImportService {
    lifecycle: Arc<ClaimLifecycle>,
    columns: DonationColumns,
}

impl ImportService {
    pub fn new(lifecycle: Arc<ClaimLifecycle>, columns: DonationColumns) -> Self {
        Self { lifecycle, columns }
    }

    /// Column names used when the caller gives none
    pub fn columns(&self) -> &DonationColumns {
        &self.columns
    }

    /// Import donations from a CSV file into a draft claim
    pub fn import(
        &self,
        file_path: &Path,
        claim_id: Uuid,
        columns: Option<&DonationColumns>,
        preview_only: bool,
    ) -> Result<ImportResult> {
        let reader = reader_builder()
            .from_path(file_path)
            .map_err(std::io::Error::from)?;
        self.import_from(reader, claim_id, columns, preview_only)
    }

    /// Import donations from any CSV source
    pub fn import_reader<R: Read>(
        &self,
        source: R,
        claim_id: Uuid,
        columns: Option<&DonationColumns>,
        preview_only: bool,
    ) -> Result<ImportResult> {
        self.import_from(reader_builder().from_reader(source), claim_id, columns, preview_only)
    }

    fn import_from<R: Read>(
        &self,
        mut reader: csv::Reader<R>,
        claim_id: Uuid,
        columns: Option<&DonationColumns>,
        preview_only: bool,
    ) -> Result<ImportResult> {
        let claim = self.lifecycle.get_claim(claim_id)?;
        if claim.status != ClaimStatus::Draft {
            return Err(Error::state(format!(
                "claim {} is {}; donations can only be imported into a draft",
                claim.id, claim.status
            )));
        }

        let columns = columns.unwrap_or(&self.columns);
        let headers = reader.headers().map_err(std::io::Error::from)?.clone();
        let layout = ColumnLayout::resolve(&headers, columns)?;

        let mut donations = Vec::new();
        let mut errors = Vec::new();
        let mut skipped = 0;

        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(std::io::Error::from)?;
            // Quoted fields may span lines, so prefer the parser's position
            let line = record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(index + 2);

            if record.iter().all(|field| field.trim().is_empty()) {
                skipped += 1;
                continue;
            }

            if record.len() <= layout.last_index() {
                errors.push(RowError {
                    line,
                    field: None,
                    message: format!(
                        "row has {} fields but the header has {}",
                        record.len(),
                        headers.len()
                    ),
                });
                continue;
            }

            match validate_donation(&layout.input(&record)) {
                Ok(valid) => donations.push(valid),
                Err(e) => errors.push(RowError::from_error(line, e)),
            }
        }

        let discovered = donations.len() + errors.len();
        let imported = if errors.is_empty() && !preview_only && !donations.is_empty() {
            self.lifecycle.add_donations(claim_id, donations.clone())?
        } else {
            0
        };

        Ok(ImportResult {
            claim_id,
            discovered,
            imported,
            skipped,
            preview: preview_only,
            errors,
            donations: if preview_only {
                Some(donations.iter().map(DonationPreview::from).collect())
            } else {
                None
            },
        })
    }
}

/// Short rows are reported per line instead of failing the whole read
fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.flexible(true);
    builder
}

/// Header positions for one import
struct ColumnLayout {
    title: Option<usize>,
    first_name: usize,
    last_name: usize,
    address: usize,
    postcode: usize,
    date: usize,
    amount: usize,
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord, columns: &DonationColumns) -> Result<Self> {
        Ok(Self {
            // An absent title column just means no titles
            title: columns
                .title
                .as_deref()
                .and_then(|name| column_index(headers, name)),
            first_name: required_column(headers, &columns.first_name)?,
            last_name: required_column(headers, &columns.last_name)?,
            address: required_column(headers, &columns.address)?,
            postcode: required_column(headers, &columns.postcode)?,
            date: required_column(headers, &columns.date)?,
            amount: required_column(headers, &columns.amount)?,
        })
    }

    /// Highest column a row must reach
    fn last_index(&self) -> usize {
        [
            self.first_name,
            self.last_name,
            self.address,
            self.postcode,
            self.date,
            self.amount,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn input(&self, record: &StringRecord) -> DonationInput {
        let get = |i: usize| record.get(i).unwrap_or("").to_string();
        DonationInput {
            title: self.title.map(get).filter(|t| !t.trim().is_empty()),
            first_name: get(self.first_name),
            last_name: get(self.last_name),
            address: get(self.address),
            postcode: get(self.postcode),
            donation_date: get(self.date),
            amount: get(self.amount),
        }
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name.trim()))
}

fn required_column(headers: &StringRecord, name: &str) -> Result<usize> {
    column_index(headers, name).ok_or_else(|| {
        Error::validation(
            "columns",
            format!("column '{}' not found in CSV header", name),
        )
    })
}

/// A row that failed validation
#[derive(Debug, Clone, Serialize)]
pub struct RowError {
    /// Line number in the file, counting the header as line 1
    pub line: usize,
    pub field: Option<String>,
    pub message: String,
}

impl RowError {
    fn from_error(line: usize, error: Error) -> Self {
        match error {
            Error::Validation { field, message } => Self {
                line,
                field: Some(field),
                message,
            },
            other => Self {
                line,
                field: None,
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ImportResult {
    pub claim_id: Uuid,
    /// Non-blank data rows found in the file
    pub discovered: usize,
    /// Rows stored on the claim; zero whenever any row failed
    pub imported: usize,
    /// Blank rows
    pub skipped: usize,
    /// Whether this was a preview (no changes applied)
    pub preview: bool,
    pub errors: Vec<RowError>,
    /// Validated rows (only in preview mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donations: Option<Vec<DonationPreview>>,
}

#[derive(Debug, Serialize)]
pub struct DonationPreview {
    pub name: String,
    pub postcode: String,
    pub date: String,
    pub amount: String,
}

impl From<&ValidDonation> for DonationPreview {
    fn from(d: &ValidDonation) -> Self {
        Self {
            name: format!("{} {}", d.first_name, d.last_name),
            postcode: d.postcode.clone(),
            date: format_date(d.donation_date),
            amount: format_money(d.amount),
        }
    }
}
