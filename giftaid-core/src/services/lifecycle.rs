//! Claim lifecycle - draft, ready, submitted and the polled terminal states
//!
//! Every status change is a compare-and-set on the claims table, so two
//! callers racing on the same claim cannot both win.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::adapters::duckdb::DuckDbRepository;
use crate::adapters::govtalk::parse_reply;
use crate::domain::result::{Error, Result};
use crate::domain::{
    Charity, Claim, ClaimStatus, DonationInput, DonationRecord, GatewayReply, NewClaim,
    OutcomeKind, TransportOutcome, ValidDonation,
};
use crate::ports::GatewayTransport;

use super::envelope::EnvelopeBuilder;
use super::gateway::GatewayService;
use super::logging::{LogEvent, LoggingService};
use super::validation::{check_claim_total, validate_donation};

/// A claim together with its charity and donation rows
#[derive(Debug, Clone, Serialize)]
pub struct ClaimDetail {
    pub claim: Claim,
    pub charity: Charity,
    pub donations: Vec<DonationRecord>,
}

/// What happened when a ready claim was sent to the gateway
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    /// The claim after the outcome was recorded; always `submitted`
    pub claim: Claim,
    pub outcome: TransportOutcome,
    pub reply: GatewayReply,
    pub message: String,
}

/// What happened when a submitted claim was polled
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub claim: Claim,
    pub outcome: TransportOutcome,
    pub reply: GatewayReply,
    pub message: String,
    /// False while the gateway is still processing or unreachable
    pub status_changed: bool,
}

/// Drives claims through their states
pub struct ClaimLifecycle {
    repository: Arc<DuckDbRepository>,
    gateway: Arc<GatewayService>,
    builder: EnvelopeBuilder,
    transport: Arc<dyn GatewayTransport>,
    logger: Option<Arc<LoggingService>>,
}

impl ClaimLifecycle {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        gateway: Arc<GatewayService>,
        builder: EnvelopeBuilder,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        Self {
            repository,
            gateway,
            builder,
            transport,
            logger: None,
        }
    }

    /// Record lifecycle events in the structured log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    // Logging never fails an operation
    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(event.with_gateway_mode(self.builder.mode().as_str()));
        }
    }

    // === Claims ===

    /// Open a draft claim for an existing charity
    pub fn create_claim(&self, request: NewClaim) -> Result<Claim> {
        if self.repository.get_charity(request.charity_id)?.is_none() {
            return Err(Error::not_found(format!("charity {}", request.charity_id)));
        }
        let claim = request.into_claim()?;
        self.repository.insert_claim(&claim)?;
        self.log(LogEvent::new("claim_created").with_claim(claim.id));
        Ok(claim)
    }

    pub fn list_claims(&self, charity_id: Option<Uuid>) -> Result<Vec<Claim>> {
        Ok(self.repository.list_claims(charity_id)?)
    }

    pub fn get_claim(&self, claim_id: Uuid) -> Result<Claim> {
        self.repository
            .get_claim(claim_id)?
            .ok_or_else(|| Error::not_found(format!("claim {}", claim_id)))
    }

    pub fn claim_with_donations(&self, claim_id: Uuid) -> Result<ClaimDetail> {
        let claim = self.get_claim(claim_id)?;
        let charity = self.charity_for(&claim)?;
        let donations = self.repository.list_donations(claim_id)?;
        Ok(ClaimDetail {
            claim,
            charity,
            donations,
        })
    }

    pub fn list_donations(&self, claim_id: Uuid) -> Result<Vec<DonationRecord>> {
        self.get_claim(claim_id)?;
        Ok(self.repository.list_donations(claim_id)?)
    }

    fn charity_for(&self, claim: &Claim) -> Result<Charity> {
        self.repository
            .get_charity(claim.charity_id)?
            .ok_or_else(|| Error::not_found(format!("charity {}", claim.charity_id)))
    }

    // === Donation rows (draft only) ===

    fn require_draft(&self, claim_id: Uuid) -> Result<Claim> {
        let claim = self.get_claim(claim_id)?;
        if claim.status != ClaimStatus::Draft {
            return Err(frozen(&claim));
        }
        Ok(claim)
    }

    /// Validate and append one donation row
    pub fn add_donation(&self, claim_id: Uuid, input: &DonationInput) -> Result<DonationRecord> {
        let claim = self.require_draft(claim_id)?;
        let record = validate_donation(input)?.into_record(claim_id);
        self.repository
            .insert_donation_if_draft(&record)?
            .ok_or_else(|| frozen_after_race(&claim))
    }

    /// Append already-validated rows; all are stored or none are
    pub fn add_donations(&self, claim_id: Uuid, donations: Vec<ValidDonation>) -> Result<usize> {
        let claim = self.require_draft(claim_id)?;
        let records: Vec<DonationRecord> = donations
            .into_iter()
            .map(|d| d.into_record(claim_id))
            .collect();
        if !self
            .repository
            .insert_donations_if_draft(claim_id, &records)?
        {
            return Err(frozen_after_race(&claim));
        }
        Ok(records.len())
    }

    /// Replace a row's fields, keeping its id and position
    pub fn update_donation(
        &self,
        claim_id: Uuid,
        donation_id: Uuid,
        input: &DonationInput,
    ) -> Result<DonationRecord> {
        let claim = self.require_draft(claim_id)?;
        let existing = self.donation_in_claim(claim_id, donation_id)?;
        let valid = validate_donation(input)?;

        let record = DonationRecord {
            id: existing.id,
            claim_id,
            position: existing.position,
            title: valid.title,
            first_name: valid.first_name,
            last_name: valid.last_name,
            address: valid.address,
            postcode: valid.postcode,
            donation_date: valid.donation_date,
            amount: valid.amount,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        if !self.repository.update_donation_if_draft(&record)? {
            return Err(frozen_after_race(&claim));
        }
        Ok(record)
    }

    pub fn delete_donation(&self, claim_id: Uuid, donation_id: Uuid) -> Result<()> {
        let claim = self.require_draft(claim_id)?;
        self.donation_in_claim(claim_id, donation_id)?;
        if !self
            .repository
            .delete_donation_if_draft(claim_id, donation_id)?
        {
            return Err(frozen_after_race(&claim));
        }
        Ok(())
    }

    fn donation_in_claim(&self, claim_id: Uuid, donation_id: Uuid) -> Result<DonationRecord> {
        self.repository
            .get_donation(donation_id)?
            .filter(|d| d.claim_id == claim_id)
            .ok_or_else(|| {
                Error::not_found(format!("donation {} in claim {}", donation_id, claim_id))
            })
    }

    // === Transitions ===

    /// draft -> ready, freezing the donation count and total
    ///
    /// Calling it again on a ready claim returns the claim unchanged.
    pub fn transition_to_ready(&self, claim_id: Uuid) -> Result<Claim> {
        let claim = self.get_claim(claim_id)?;
        match claim.status {
            ClaimStatus::Ready => return Ok(claim),
            ClaimStatus::Draft => {}
            _ => {
                return Err(Error::state(format!(
                    "claim {} is already {}; it cannot go back to ready",
                    claim.id, claim.status
                )))
            }
        }

        let (rows, total) = self.repository.donation_total(claim_id)?;
        if rows == 0 {
            return Err(Error::state(format!(
                "claim {} has no donation rows",
                claim_id
            )));
        }
        check_claim_total(total)?;

        if !self.repository.freeze_claim(claim_id)? {
            let current = self.get_claim(claim_id)?;
            if current.status == ClaimStatus::Ready {
                return Ok(current);
            }
            return Err(Error::state(format!(
                "claim {} changed while being marked ready (now {})",
                claim_id, current.status
            )));
        }

        let ready = self.get_claim(claim_id)?;
        self.log(LogEvent::new("claim_marked_ready").with_claim(claim_id));
        Ok(ready)
    }

    /// Render the submission envelope of a ready (or later) claim
    pub fn render_envelope(&self, claim_id: Uuid) -> Result<String> {
        let claim = self.get_claim(claim_id)?;
        let charity = self.charity_for(&claim)?;
        let items = self.repository.list_donations(claim_id)?;
        let credentials = self.gateway.load_credentials(charity.id)?;
        self.builder.build(&claim, &items, &charity, &credentials)
    }

    /// ready -> submitted, then send the envelope
    ///
    /// The claim ends up `submitted` whatever the transport does; the
    /// outcome is stored as the claim's last message and raw response.
    /// That write is retried, and if it still fails the outcome goes to the
    /// event log before the error is returned.
    pub fn submit(&self, claim_id: Uuid) -> Result<SubmitResult> {
        let claim = self.get_claim(claim_id)?;
        if claim.status != ClaimStatus::Ready {
            return Err(Error::state(format!(
                "claim {} is {}; only ready claims can be submitted",
                claim.id, claim.status
            )));
        }

        let charity = self.charity_for(&claim)?;
        let items = self.repository.list_donations(claim_id)?;
        let credentials = self.gateway.load_credentials(charity.id)?;
        let xml = self.builder.build(&claim, &items, &charity, &credentials)?;

        let correlation_id = claim.derived_correlation_id();
        if !self.repository.mark_submitted(
            claim_id,
            &correlation_id,
            SUBMISSION_PENDING_MESSAGE,
            Utc::now(),
        )? {
            return Err(Error::state(format!(
                "claim {} was submitted by another caller",
                claim_id
            )));
        }

        let outcome = self.transport.submit(&xml);
        let reply = parse_reply(&outcome.body);
        let message = submission_message(&outcome, &reply);

        let recorded = retry_write(OUTCOME_WRITE_ATTEMPTS, || {
            self.repository.record_outcome(
                claim_id,
                &message,
                raw_body(&outcome),
                reply.correlation_id.as_deref(),
            )
        });
        if let Err(e) = recorded {
            // The claim is already submitted; keep the outcome in the event log
            let details = match raw_body(&outcome) {
                Some(body) => format!("{}\n{}", message, body),
                None => message.clone(),
            };
            self.log(
                LogEvent::new("claim_outcome_unrecorded")
                    .with_claim(claim_id)
                    .with_error(e.to_string())
                    .with_error_details(details),
            );
            return Err(e.into());
        }

        let event = if outcome.success {
            LogEvent::new("claim_submitted")
        } else {
            LogEvent::new("claim_submission_failed").with_error(outcome_label(&outcome))
        };
        self.log(event.with_claim(claim_id));

        Ok(SubmitResult {
            claim: self.get_claim(claim_id)?,
            outcome,
            reply,
            message,
        })
    }

    /// Ask the gateway how a submitted claim is doing
    pub fn poll(&self, claim_id: Uuid) -> Result<PollResult> {
        let claim = self.get_claim(claim_id)?;
        if claim.status != ClaimStatus::Submitted {
            return Err(Error::state(format!(
                "claim {} is {}; only submitted claims can be polled",
                claim.id, claim.status
            )));
        }

        let correlation_id = claim
            .correlation_id
            .clone()
            .unwrap_or_else(|| claim.derived_correlation_id());
        let credentials = self.gateway.load_credentials(claim.charity_id)?;

        let outcome = self.transport.poll(&correlation_id, &credentials)?;
        let reply = parse_reply(&outcome.body);
        let (next, message) = poll_decision(&outcome, &reply);

        let status_changed = match next {
            Some(next) => {
                if !self.repository.transition_status(
                    claim_id,
                    ClaimStatus::Submitted,
                    next,
                    &message,
                    raw_body(&outcome),
                )? {
                    return Err(Error::state(format!(
                        "claim {} changed while being polled",
                        claim_id
                    )));
                }
                true
            }
            None => {
                self.repository.record_outcome(
                    claim_id,
                    &message,
                    raw_body(&outcome),
                    reply.correlation_id.as_deref(),
                )?;
                false
            }
        };

        self.log(LogEvent::new("claim_polled").with_claim(claim_id));

        Ok(PollResult {
            claim: self.get_claim(claim_id)?,
            outcome,
            reply,
            message,
            status_changed,
        })
    }
}

fn frozen(claim: &Claim) -> Error {
    Error::state(format!(
        "claim {} is {}; donation rows can only change while it is a draft",
        claim.id, claim.status
    ))
}

fn frozen_after_race(claim: &Claim) -> Error {
    Error::state(format!(
        "claim {} left draft before the change was stored",
        claim.id
    ))
}

fn raw_body(outcome: &TransportOutcome) -> Option<&str> {
    Some(outcome.body.as_str()).filter(|b| !b.is_empty())
}

fn outcome_label(outcome: &TransportOutcome) -> String {
    match outcome.kind {
        OutcomeKind::Delivered => "delivered".to_string(),
        OutcomeKind::HttpError => format!("http {}", outcome.http_status),
        OutcomeKind::Timeout => "timeout".to_string(),
        OutcomeKind::Network => "network".to_string(),
    }
}

fn detail(outcome: &TransportOutcome) -> &str {
    outcome.detail.as_deref().unwrap_or("no detail")
}

fn gateway_error(reply: &GatewayReply) -> String {
    format!(
        "Gateway reported {} error: {}",
        reply.error_type.as_deref().unwrap_or("unknown"),
        reply.error_text.as_deref().unwrap_or("no error text")
    )
}

/// Last message of a claim between the status change and the gateway reply
pub const SUBMISSION_PENDING_MESSAGE: &str = "Submission sent; no gateway outcome recorded yet";

/// Writes of a submission outcome before giving up
const OUTCOME_WRITE_ATTEMPTS: u32 = 3;

/// Run `write` up to `attempts` times, backing off 50ms, 100ms, ...
fn retry_write<T, E>(
    attempts: u32,
    mut write: impl FnMut() -> std::result::Result<T, E>,
) -> std::result::Result<T, E> {
    let mut attempt = 1;
    loop {
        match write() {
            Ok(value) => return Ok(value),
            Err(_) if attempt < attempts => {
                thread::sleep(Duration::from_millis(50 * 2u64.pow(attempt - 1)));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Message stored on the claim after a submission attempt
pub fn submission_message(outcome: &TransportOutcome, reply: &GatewayReply) -> String {
    match outcome.kind {
        OutcomeKind::HttpError => {
            format!("Gateway rejected submission: HTTP {}", outcome.http_status)
        }
        OutcomeKind::Timeout => format!("Gateway timed out: {}", detail(outcome)),
        OutcomeKind::Network => format!("Gateway unreachable: {}", detail(outcome)),
        OutcomeKind::Delivered => match reply.qualifier.as_deref() {
            Some("error") => gateway_error(reply),
            Some("acknowledgement") => format!(
                "Submission acknowledged by gateway (correlation id {})",
                reply.correlation_id.as_deref().unwrap_or("not returned")
            ),
            Some("response") => "Gateway accepted submission".to_string(),
            _ => format!("Submission delivered: HTTP {}", outcome.http_status),
        },
    }
}

/// Map a poll outcome to the next status, if any, and a message
pub fn poll_decision(
    outcome: &TransportOutcome,
    reply: &GatewayReply,
) -> (Option<ClaimStatus>, String) {
    match outcome.kind {
        OutcomeKind::HttpError => (
            None,
            format!("Poll rejected by gateway: HTTP {}", outcome.http_status),
        ),
        OutcomeKind::Timeout => (None, format!("Poll timed out: {}", detail(outcome))),
        OutcomeKind::Network => (None, format!("Poll could not reach gateway: {}", detail(outcome))),
        OutcomeKind::Delivered => match reply.qualifier.as_deref() {
            Some("response") => (
                Some(ClaimStatus::Accepted),
                "Gateway accepted claim".to_string(),
            ),
            Some("error") if reply.error_type.as_deref() == Some("business") => (
                Some(ClaimStatus::Rejected),
                format!(
                    "Gateway rejected claim: {}",
                    reply.error_text.as_deref().unwrap_or("no error text")
                ),
            ),
            Some("error") => (Some(ClaimStatus::Failed), gateway_error(reply)),
            _ => (None, "Claim is still being processed by the gateway".to_string()),
        },
    }
}
