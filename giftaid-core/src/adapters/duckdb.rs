//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{
    Charity, Claim, ClaimStatus, CredentialMode, DonationRecord, GatewayConnection,
};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

const CLAIM_COLUMNS: &str = "claim_id, charity_id, period_start::VARCHAR, period_end::VARCHAR,
    tax_year, status, donation_count, total_amount::VARCHAR, correlation_id,
    last_message, last_response, submitted_at, created_at, updated_at";

const DONATION_COLUMNS: &str = "donation_id, claim_id, position, title, first_name, last_name,
    address, postcode, donation_date::VARCHAR, amount::VARCHAR, created_at, updated_at";

const CHARITY_COLUMNS: &str =
    "charity_id, name, contact_email, hmrc_ref, regulator_number, created_at, updated_at";

const CONNECTION_COLUMNS: &str = "connection_id, charity_id, credential_mode,
    encrypted_credentials, is_active, created_at, deactivated_at";

/// DuckDB repository implementation
///
/// Every operation that must not race (status changes, donation edits) is a
/// single guarded statement, so the check and the write cannot be separated.
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database at `db_path`
    ///
    /// Retries with exponential backoff when the file is locked by another
    /// process, which happens when two CLI invocations overlap.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[giftaid] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// In-memory database, used by unit tests
    pub fn in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; nothing here needs extensions
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)
            .with_context(|| format!("Failed to open {}", db_path.display()))?;
        Ok(conn)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // === Charity operations ===

    pub fn insert_charity(&self, charity: &Charity) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO charities (charity_id, name, contact_email, hmrc_ref, regulator_number,
                                    created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                charity.id.to_string(),
                charity.name,
                charity.contact_email,
                charity.hmrc_ref,
                charity.regulator_number,
                charity.created_at.to_rfc3339(),
                charity.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_charity(&self, id: Uuid) -> Result<Option<Charity>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM charities WHERE charity_id = ?", CHARITY_COLUMNS);
        optional(conn.query_row(&sql, [id.to_string()], row_to_charity))
    }

    pub fn list_charities(&self) -> Result<Vec<Charity>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM charities ORDER BY name", CHARITY_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let charities = stmt
            .query_map([], row_to_charity)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(charities)
    }

    // === Claim operations ===

    pub fn insert_claim(&self, claim: &Claim) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO claims (claim_id, charity_id, period_start, period_end, tax_year, status,
                                 donation_count, total_amount, correlation_id, last_message,
                                 last_response, submitted_at, created_at, updated_at)
             VALUES (?, ?, CAST(? AS DATE), CAST(? AS DATE), ?, ?, ?, CAST(? AS DECIMAL(12, 2)),
                     ?, ?, ?, ?, ?, ?)",
            params![
                claim.id.to_string(),
                claim.charity_id.to_string(),
                claim.period_start.to_string(),
                claim.period_end.to_string(),
                claim.tax_year,
                claim.status.as_str(),
                claim.donation_count,
                claim.total_amount.to_string(),
                claim.correlation_id,
                claim.last_message,
                claim.last_response,
                claim.submitted_at.map(|t| t.to_rfc3339()),
                claim.created_at.to_rfc3339(),
                claim.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_claim(&self, id: Uuid) -> Result<Option<Claim>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM claims WHERE claim_id = ?", CLAIM_COLUMNS);
        optional(conn.query_row(&sql, [id.to_string()], row_to_claim))
    }

    /// All claims, newest first, optionally for one charity
    pub fn list_claims(&self, charity_id: Option<Uuid>) -> Result<Vec<Claim>> {
        let conn = self.lock()?;
        let claims = match charity_id {
            Some(charity_id) => {
                let sql = format!(
                    "SELECT {} FROM claims WHERE charity_id = ? ORDER BY created_at DESC",
                    CLAIM_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([charity_id.to_string()], row_to_claim)?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!("SELECT {} FROM claims ORDER BY created_at DESC", CLAIM_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], row_to_claim)?
                    .collect::<duckdb::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(claims)
    }

    /// draft -> ready, freezing count and total from the current rows
    ///
    /// Returns false (and changes nothing) unless the claim is still a draft
    /// with at least one donation row.
    pub fn freeze_claim(&self, claim_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let id = claim_id.to_string();
        let changed = conn.execute(
            "UPDATE claims SET
                status = 'ready',
                donation_count = (SELECT COUNT(*) FROM donation_records WHERE claim_id = ?),
                total_amount = (SELECT COALESCE(SUM(amount), 0) FROM donation_records WHERE claim_id = ?),
                updated_at = ?
             WHERE claim_id = ? AND status = 'draft'
               AND EXISTS (SELECT 1 FROM donation_records WHERE claim_id = ?)",
            params![id, id, Utc::now().to_rfc3339(), id, id],
        )?;
        Ok(changed > 0)
    }

    /// ready -> submitted; false if the claim was no longer ready
    ///
    /// `pending_message` replaces the last message and the last response is
    /// cleared, so a claim never shows a stale outcome while it is in flight.
    pub fn mark_submitted(
        &self,
        claim_id: Uuid,
        correlation_id: &str,
        pending_message: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE claims SET status = 'submitted', correlation_id = ?, last_message = ?,
                               last_response = NULL, submitted_at = ?, updated_at = ?
             WHERE claim_id = ? AND status = 'ready'",
            params![
                correlation_id,
                pending_message,
                submitted_at.to_rfc3339(),
                submitted_at.to_rfc3339(),
                claim_id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Store a transport outcome without touching the status
    ///
    /// A `None` correlation id keeps the stored one.
    pub fn record_outcome(
        &self,
        claim_id: Uuid,
        message: &str,
        raw_response: Option<&str>,
        correlation_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE claims SET last_message = ?, last_response = ?,
                               correlation_id = COALESCE(?, correlation_id), updated_at = ?
             WHERE claim_id = ?",
            params![
                message,
                raw_response,
                correlation_id,
                Utc::now().to_rfc3339(),
                claim_id.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Compare-and-set a status change, recording the message with it
    pub fn transition_status(
        &self,
        claim_id: Uuid,
        expected: ClaimStatus,
        next: ClaimStatus,
        message: &str,
        raw_response: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE claims SET status = ?, last_message = ?, last_response = ?, updated_at = ?
             WHERE claim_id = ? AND status = ?",
            params![
                next.as_str(),
                message,
                raw_response,
                Utc::now().to_rfc3339(),
                claim_id.to_string(),
                expected.as_str(),
            ],
        )?;
        Ok(changed > 0)
    }

    // === Donation operations ===

    pub fn list_donations(&self, claim_id: Uuid) -> Result<Vec<DonationRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM donation_records WHERE claim_id = ? ORDER BY position",
            DONATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([claim_id.to_string()], row_to_donation)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn get_donation(&self, id: Uuid) -> Result<Option<DonationRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM donation_records WHERE donation_id = ?",
            DONATION_COLUMNS
        );
        optional(conn.query_row(&sql, [id.to_string()], row_to_donation))
    }

    pub fn count_donations(&self, claim_id: Uuid) -> Result<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM donation_records WHERE claim_id = ?",
            [claim_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Row count and amount sum, as a freeze would compute them
    pub fn donation_total(&self, claim_id: Uuid) -> Result<(i64, Decimal)> {
        let conn = self.lock()?;
        let total = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(amount), 0)::VARCHAR
             FROM donation_records WHERE claim_id = ?",
            [claim_id.to_string()],
            |row| Ok((row.get(0)?, get_decimal(row, 1)?)),
        )?;
        Ok(total)
    }

    /// Append a row, only while the owning claim is a draft
    ///
    /// Returns the stored record (with its position) or `None` when the guard
    /// refused the insert.
    pub fn insert_donation_if_draft(
        &self,
        record: &DonationRecord,
    ) -> Result<Option<DonationRecord>> {
        let conn = self.lock()?;
        let inserted = insert_guarded(&conn, record)?;
        drop(conn);
        if !inserted {
            return Ok(None);
        }
        self.get_donation(record.id)
    }

    /// Append many rows in one transaction, only while the claim is a draft
    ///
    /// All rows are written or none are.
    pub fn insert_donations_if_draft(
        &self,
        claim_id: Uuid,
        records: &[DonationRecord],
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            if record.claim_id != claim_id {
                return Err(anyhow!(
                    "donation {} does not belong to claim {}",
                    record.id,
                    claim_id
                ));
            }
            if !insert_guarded(&tx, record)? {
                // Dropping the transaction rolls it back
                return Ok(false);
            }
        }
        tx.commit()?;
        Ok(true)
    }

    /// Replace a row's fields, only while the owning claim is a draft
    pub fn update_donation_if_draft(&self, record: &DonationRecord) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE donation_records SET
                title = ?, first_name = ?, last_name = ?, address = ?, postcode = ?,
                donation_date = CAST(? AS DATE), amount = CAST(? AS DECIMAL(12, 2)),
                updated_at = ?
             WHERE donation_id = ? AND claim_id = ?
               AND EXISTS (SELECT 1 FROM claims WHERE claim_id = ? AND status = 'draft')",
            params![
                record.title,
                record.first_name,
                record.last_name,
                record.address,
                record.postcode,
                record.donation_date.to_string(),
                record.amount.to_string(),
                record.updated_at.to_rfc3339(),
                record.id.to_string(),
                record.claim_id.to_string(),
                record.claim_id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a row, only while the owning claim is a draft
    pub fn delete_donation_if_draft(&self, claim_id: Uuid, donation_id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "DELETE FROM donation_records
             WHERE donation_id = ? AND claim_id = ?
               AND EXISTS (SELECT 1 FROM claims WHERE claim_id = ? AND status = 'draft')",
            params![
                donation_id.to_string(),
                claim_id.to_string(),
                claim_id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    // === Gateway connection operations ===

    /// Deactivate every active connection for the charity, then insert the
    /// new one, in a single transaction
    pub fn activate_connection(&self, connection: &GatewayConnection) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE gateway_connections SET is_active = FALSE, deactivated_at = ?
             WHERE charity_id = ? AND is_active",
            params![
                connection.created_at.to_rfc3339(),
                connection.charity_id.to_string(),
            ],
        )?;
        tx.execute(
            "INSERT INTO gateway_connections (connection_id, charity_id, credential_mode,
                                              encrypted_credentials, is_active, created_at,
                                              deactivated_at)
             VALUES (?, ?, ?, ?, TRUE, ?, NULL)",
            params![
                connection.id.to_string(),
                connection.charity_id.to_string(),
                connection.mode.as_str(),
                connection.encrypted_credentials,
                connection.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_active_connection(&self, charity_id: Uuid) -> Result<Option<GatewayConnection>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM gateway_connections WHERE charity_id = ? AND is_active
             ORDER BY created_at DESC LIMIT 1",
            CONNECTION_COLUMNS
        );
        optional(conn.query_row(&sql, [charity_id.to_string()], row_to_connection))
    }

    /// Full history for a charity, newest first
    pub fn list_connections(&self, charity_id: Uuid) -> Result<Vec<GatewayConnection>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM gateway_connections WHERE charity_id = ? ORDER BY created_at DESC",
            CONNECTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let connections = stmt
            .query_map([charity_id.to_string()], row_to_connection)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(connections)
    }
}

/// Insert one donation row behind the draft guard; position is appended
fn insert_guarded(conn: &Connection, record: &DonationRecord) -> Result<bool> {
    let claim_id = record.claim_id.to_string();
    let changed = conn.execute(
        "INSERT INTO donation_records (donation_id, claim_id, position, title, first_name,
                                       last_name, address, postcode, donation_date, amount,
                                       created_at, updated_at)
         SELECT CAST(? AS VARCHAR), CAST(? AS VARCHAR),
                (SELECT COALESCE(MAX(position), 0) + 1 FROM donation_records WHERE claim_id = ?),
                CAST(? AS VARCHAR), CAST(? AS VARCHAR), CAST(? AS VARCHAR), CAST(? AS VARCHAR),
                CAST(? AS VARCHAR), CAST(? AS DATE), CAST(? AS DECIMAL(12, 2)),
                CAST(? AS VARCHAR), CAST(? AS VARCHAR)
         WHERE EXISTS (SELECT 1 FROM claims WHERE claim_id = ? AND status = 'draft')",
        params![
            record.id.to_string(),
            claim_id,
            claim_id,
            record.title,
            record.first_name,
            record.last_name,
            record.address,
            record.postcode,
            record.donation_date.to_string(),
            record.amount.to_string(),
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
            claim_id,
        ],
    )?;
    Ok(changed > 0)
}

// Helper functions

fn optional<T>(result: duckdb::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn conversion_error<E>(idx: usize, err: E) -> duckdb::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn get_uuid(row: &duckdb::Row, idx: usize) -> duckdb::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_date(row: &duckdb::Row, idx: usize) -> duckdb::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn get_decimal(row: &duckdb::Row, idx: usize) -> duckdb::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str_exact(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_timestamp(row: &duckdb::Row, idx: usize) -> duckdb::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_opt_timestamp(row: &duckdb::Row, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_charity(row: &duckdb::Row) -> duckdb::Result<Charity> {
    Ok(Charity {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        contact_email: row.get(2)?,
        hmrc_ref: row.get(3)?,
        regulator_number: row.get(4)?,
        created_at: get_timestamp(row, 5)?,
        updated_at: get_timestamp(row, 6)?,
    })
}

fn row_to_claim(row: &duckdb::Row) -> duckdb::Result<Claim> {
    let status: String = row.get(5)?;
    Ok(Claim {
        id: get_uuid(row, 0)?,
        charity_id: get_uuid(row, 1)?,
        period_start: get_date(row, 2)?,
        period_end: get_date(row, 3)?,
        tax_year: row.get(4)?,
        status: ClaimStatus::from_str(&status).map_err(|e| conversion_error(5, e))?,
        donation_count: row.get(6)?,
        total_amount: get_decimal(row, 7)?,
        correlation_id: row.get(8)?,
        last_message: row.get(9)?,
        last_response: row.get(10)?,
        submitted_at: get_opt_timestamp(row, 11)?,
        created_at: get_timestamp(row, 12)?,
        updated_at: get_timestamp(row, 13)?,
    })
}

fn row_to_donation(row: &duckdb::Row) -> duckdb::Result<DonationRecord> {
    Ok(DonationRecord {
        id: get_uuid(row, 0)?,
        claim_id: get_uuid(row, 1)?,
        position: row.get(2)?,
        title: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        address: row.get(6)?,
        postcode: row.get(7)?,
        donation_date: get_date(row, 8)?,
        amount: get_decimal(row, 9)?,
        created_at: get_timestamp(row, 10)?,
        updated_at: get_timestamp(row, 11)?,
    })
}

fn row_to_connection(row: &duckdb::Row) -> duckdb::Result<GatewayConnection> {
    let mode: String = row.get(2)?;
    Ok(GatewayConnection {
        id: get_uuid(row, 0)?,
        charity_id: get_uuid(row, 1)?,
        mode: CredentialMode::from_str(&mode).map_err(|e| conversion_error(2, e))?,
        encrypted_credentials: row.get(3)?,
        is_active: row.get(4)?,
        created_at: get_timestamp(row, 5)?,
        deactivated_at: get_opt_timestamp(row, 6)?,
    })
}
