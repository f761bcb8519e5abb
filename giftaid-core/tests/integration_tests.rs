//! Integration tests for giftaid-core
//!
//! These tests exercise the full stack through `GiftAidContext`: a real
//! DuckDB file in a temp directory, the vault, the envelope builder and the
//! lifecycle, with a stub transport standing in for the gateway.
//!
//! Run with: cargo test --test integration_tests

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use giftaid_core::config::CREDENTIALS_SECRET_ENV;
use giftaid_core::ports::GatewayTransport;
use giftaid_core::services::{EntryPoint, LogEvent, LoggingService};
use giftaid_core::{
    ClaimStatus, CredentialMode, DonationInput, Error, GatewayCredentials, GiftAidContext,
    NewCharity, NewClaim, TransportOutcome,
};

const SECRET: &str = "integration test secret";

// ============================================================================
// Test Helpers
// ============================================================================

/// Gateway stand-in: returns a fixed outcome and keeps what it was sent
struct RecordingTransport {
    outcome: TransportOutcome,
    poll_outcome: TransportOutcome,
    submitted: Mutex<Vec<String>>,
    polled: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn new(outcome: TransportOutcome) -> Arc<Self> {
        Self::with_poll(outcome, acknowledgement())
    }

    fn with_poll(outcome: TransportOutcome, poll_outcome: TransportOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            poll_outcome,
            submitted: Mutex::new(Vec::new()),
            polled: Mutex::new(Vec::new()),
        })
    }
}

impl GatewayTransport for RecordingTransport {
    fn submit(&self, xml: &str) -> TransportOutcome {
        self.submitted.lock().unwrap().push(xml.to_string());
        self.outcome.clone()
    }

    fn poll(
        &self,
        correlation_id: &str,
        _credentials: &GatewayCredentials,
    ) -> giftaid_core::domain::result::Result<TransportOutcome> {
        self.polled.lock().unwrap().push(correlation_id.to_string());
        Ok(self.poll_outcome.clone())
    }
}

fn reply(qualifier: &str, error: Option<(&str, &str)>) -> TransportOutcome {
    let errors = error
        .map(|(kind, text)| {
            format!(
                "<GovTalkDetails><GovTalkErrors><Error><Type>{}</Type><Text>{}</Text></Error></GovTalkErrors></GovTalkDetails>",
                kind, text
            )
        })
        .unwrap_or_default();
    let body = format!(
        "<GovTalkMessage><Header><MessageDetails><Qualifier>{}</Qualifier>\
         <CorrelationID>GW-CORR-1</CorrelationID></MessageDetails></Header>{}</GovTalkMessage>",
        qualifier, errors
    );
    TransportOutcome::delivered(200, body, Some("text/xml".to_string()))
}

fn acknowledgement() -> TransportOutcome {
    reply("acknowledgement", None)
}

fn open_context(dir: &Path, transport: Arc<RecordingTransport>) -> GiftAidContext {
    // Every test sets the same value, so parallel tests agree
    std::env::set_var(CREDENTIALS_SECRET_ENV, SECRET);
    let transport: Arc<dyn GatewayTransport> = transport;
    GiftAidContext::open(dir, Some(transport), None).unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn donation(first: &str, amount: &str, day: &str) -> DonationInput {
    DonationInput {
        title: None,
        first_name: first.to_string(),
        last_name: "Donor".to_string(),
        address: "1 High Street".to_string(),
        postcode: "sw1a 1aa".to_string(),
        donation_date: day.to_string(),
        amount: amount.to_string(),
    }
}

/// Registers a charity with active credentials and opens an empty claim
fn draft_claim(ctx: &GiftAidContext) -> Uuid {
    let charity = ctx
        .charity_service
        .register(NewCharity {
            name: "St Mary's Appeal".to_string(),
            contact_email: "treasurer@stmarys.example".to_string(),
            hmrc_ref: "xr12345".to_string(),
            regulator_number: Some("1099999".to_string()),
        })
        .unwrap();

    ctx.gateway_service
        .activate(
            charity.id,
            CredentialMode::CharityHeld,
            &GatewayCredentials::new("323412300001", "testing1").unwrap(),
        )
        .unwrap();

    ctx.lifecycle
        .create_claim(NewClaim {
            charity_id: charity.id,
            period_start: date(2024, 4, 6),
            period_end: date(2025, 4, 5),
            tax_year: Some("2024-25".to_string()),
        })
        .unwrap()
        .id
}

fn ready_claim(ctx: &GiftAidContext) -> Uuid {
    let claim_id = draft_claim(ctx);
    ctx.lifecycle
        .add_donation(claim_id, &donation("Alice", "10.00", "2024-05-01"))
        .unwrap();
    ctx.lifecycle
        .add_donation(claim_id, &donation("Bob", "25.50", "2024-06-15"))
        .unwrap();
    ctx.lifecycle.transition_to_ready(claim_id).unwrap();
    claim_id
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn test_claim_end_to_end() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new(acknowledgement());
    let ctx = open_context(dir.path(), transport.clone());

    let claim_id = draft_claim(&ctx);
    ctx.lifecycle
        .add_donation(claim_id, &donation("Alice", "10.00", "2024-05-01"))
        .unwrap();
    ctx.lifecycle
        .add_donation(claim_id, &donation("Bob", "25.50", "2024-06-15"))
        .unwrap();

    let ready = ctx.lifecycle.transition_to_ready(claim_id).unwrap();
    assert_eq!(ready.status, ClaimStatus::Ready);
    assert_eq!(ready.donation_count, 2);
    assert_eq!(ready.total_amount, Decimal::new(3550, 2));

    let xml = ctx.lifecycle.render_envelope(claim_id).unwrap();
    assert!(!xml.contains("{{"));
    let first = xml.find("<Total>10.00</Total>").unwrap();
    let second = xml.find("<Total>25.50</Total>").unwrap();
    assert!(first < second);
    assert_eq!(xml.matches("<GAD>").count(), 2);
    assert!(xml.contains("<EarliestGAdate>2024-05-01</EarliestGAdate>"));
    assert!(xml.contains("<Postcode>SW1A 1AA</Postcode>"));
    assert!(xml.contains("<OrgName>St Mary&apos;s Appeal</OrgName>"));
    assert!(xml.contains("<RegNo>1099999</RegNo>"));

    let result = ctx.lifecycle.submit(claim_id).unwrap();
    assert_eq!(result.claim.status, ClaimStatus::Submitted);
    assert_eq!(result.claim.correlation_id.as_deref(), Some("GW-CORR-1"));

    // Test gateway mode renders byte-for-byte the same envelope
    let sent = transport.submitted.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], xml);
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let claim_id = {
        let ctx = open_context(dir.path(), RecordingTransport::new(acknowledgement()));
        ready_claim(&ctx)
    };

    let ctx = open_context(dir.path(), RecordingTransport::new(acknowledgement()));
    let detail = ctx.lifecycle.claim_with_donations(claim_id).unwrap();
    assert_eq!(detail.claim.status, ClaimStatus::Ready);
    assert_eq!(detail.donations.len(), 2);
    assert_eq!(detail.donations[0].first_name, "Alice");
    assert_eq!(detail.donations[1].first_name, "Bob");
    assert_eq!(detail.charity.hmrc_ref, "XR12345");
}

// ============================================================================
// Mutation guard
// ============================================================================

#[test]
fn test_frozen_claim_rejects_row_changes() {
    let dir = TempDir::new().unwrap();
    let ctx = open_context(dir.path(), RecordingTransport::new(acknowledgement()));
    let claim_id = ready_claim(&ctx);
    let rows_before = ctx.lifecycle.list_donations(claim_id).unwrap();

    let add = ctx
        .lifecycle
        .add_donation(claim_id, &donation("Carol", "5.00", "2024-07-01"));
    assert!(matches!(add, Err(Error::State(_))));

    let edit = ctx.lifecycle.update_donation(
        claim_id,
        rows_before[0].id,
        &donation("Alice", "99.00", "2024-05-01"),
    );
    assert!(matches!(edit, Err(Error::State(_))));

    let delete = ctx.lifecycle.delete_donation(claim_id, rows_before[1].id);
    assert!(matches!(delete, Err(Error::State(_))));

    ctx.lifecycle.submit(claim_id).unwrap();
    let add = ctx
        .lifecycle
        .add_donation(claim_id, &donation("Dan", "1.00", "2024-07-02"));
    assert!(matches!(add, Err(Error::State(_))));

    let edit = ctx.lifecycle.update_donation(
        claim_id,
        rows_before[1].id,
        &donation("Bob", "0.01", "2024-06-15"),
    );
    assert!(matches!(edit, Err(Error::State(_))));

    let delete = ctx.lifecycle.delete_donation(claim_id, rows_before[0].id);
    assert!(matches!(delete, Err(Error::State(_))));

    assert_eq!(ctx.lifecycle.list_donations(claim_id).unwrap(), rows_before);
    let claim = ctx.lifecycle.get_claim(claim_id).unwrap();
    assert_eq!(claim.status, ClaimStatus::Submitted);
    assert_eq!(claim.total_amount, Decimal::new(3550, 2));
}

// ============================================================================
// Transport outcomes
// ============================================================================

#[test]
fn test_transport_failure_still_submits() {
    let cases = [
        (
            TransportOutcome::timeout("no response within 25s"),
            "Gateway timed out",
        ),
        (
            TransportOutcome::network("unable to connect to gateway: refused"),
            "Gateway unreachable",
        ),
        (
            TransportOutcome::http_error(500, "<html>oops</html>".to_string(), None),
            "Gateway rejected submission: HTTP 500",
        ),
    ];

    for (outcome, prefix) in cases {
        let dir = TempDir::new().unwrap();
        let ctx = open_context(dir.path(), RecordingTransport::new(outcome));
        let claim_id = ready_claim(&ctx);

        let result = ctx.lifecycle.submit(claim_id).unwrap();
        assert!(!result.outcome.success);

        let claim = ctx.lifecycle.get_claim(claim_id).unwrap();
        assert_eq!(claim.status, ClaimStatus::Submitted);
        assert!(
            claim.last_message.as_deref().unwrap().starts_with(prefix),
            "{:?}",
            claim.last_message
        );
        assert_eq!(claim.correlation_id, Some(claim.derived_correlation_id()));
    }
}

#[test]
fn test_gateway_error_reply_is_recorded() {
    let dir = TempDir::new().unwrap();
    let outcome = reply("error", Some(("fatal", "The submission failed schema validation")));
    let ctx = open_context(dir.path(), RecordingTransport::new(outcome));
    let claim_id = ready_claim(&ctx);

    let result = ctx.lifecycle.submit(claim_id).unwrap();
    assert_eq!(result.claim.status, ClaimStatus::Submitted);
    assert_eq!(
        result.message,
        "Gateway reported fatal error: The submission failed schema validation"
    );
    assert!(result.claim.last_response.unwrap().contains("GovTalkErrors"));
}

#[test]
fn test_second_submit_is_state_error() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new(acknowledgement());
    let ctx = open_context(dir.path(), transport.clone());
    let claim_id = ready_claim(&ctx);

    ctx.lifecycle.submit(claim_id).unwrap();
    assert!(matches!(
        ctx.lifecycle.submit(claim_id),
        Err(Error::State(_))
    ));
    assert_eq!(transport.submitted.lock().unwrap().len(), 1);
}

#[test]
fn test_submit_without_credentials_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let transport = RecordingTransport::new(acknowledgement());
    let ctx = open_context(dir.path(), transport.clone());

    let charity = ctx
        .charity_service
        .register(NewCharity {
            name: "No Creds".to_string(),
            contact_email: "a@b.example".to_string(),
            hmrc_ref: "NC001".to_string(),
            regulator_number: None,
        })
        .unwrap();
    let claim = ctx
        .lifecycle
        .create_claim(NewClaim {
            charity_id: charity.id,
            period_start: date(2024, 4, 6),
            period_end: date(2025, 4, 5),
            tax_year: None,
        })
        .unwrap();
    ctx.lifecycle
        .add_donation(claim.id, &donation("Eve", "3", "2024-08-01"))
        .unwrap();
    ctx.lifecycle.transition_to_ready(claim.id).unwrap();

    assert!(matches!(
        ctx.lifecycle.submit(claim.id),
        Err(Error::Configuration(_))
    ));
    // Nothing was sent and the claim is still ready
    assert!(transport.submitted.lock().unwrap().is_empty());
    assert_eq!(
        ctx.lifecycle.get_claim(claim.id).unwrap().status,
        ClaimStatus::Ready
    );
}

// ============================================================================
// Polling
// ============================================================================

#[test]
fn test_poll_outcomes() {
    let cases = [
        (reply("response", None), ClaimStatus::Accepted),
        (
            reply("error", Some(("business", "Claim period overlaps"))),
            ClaimStatus::Rejected,
        ),
        (
            reply("error", Some(("fatal", "Internal error"))),
            ClaimStatus::Failed,
        ),
        (acknowledgement(), ClaimStatus::Submitted),
        (TransportOutcome::timeout("slow"), ClaimStatus::Submitted),
    ];

    for (poll_outcome, expected) in cases {
        let dir = TempDir::new().unwrap();
        let transport = RecordingTransport::with_poll(acknowledgement(), poll_outcome);
        let ctx = open_context(dir.path(), transport.clone());
        let claim_id = ready_claim(&ctx);
        ctx.lifecycle.submit(claim_id).unwrap();

        let polled = ctx.lifecycle.poll(claim_id).unwrap();
        assert_eq!(polled.claim.status, expected);
        assert_eq!(polled.status_changed, expected != ClaimStatus::Submitted);
        assert_eq!(transport.polled.lock().unwrap()[0], "GW-CORR-1");
    }
}

// ============================================================================
// Gateway connections
// ============================================================================

#[test]
fn test_reactivation_leaves_one_active_connection() {
    let dir = TempDir::new().unwrap();
    let ctx = open_context(dir.path(), RecordingTransport::new(acknowledgement()));
    let claim_id = draft_claim(&ctx);
    let charity_id = ctx.lifecycle.get_claim(claim_id).unwrap().charity_id;

    let replacement = GatewayCredentials::new("323412300002", "rotated").unwrap();
    ctx.gateway_service
        .activate(charity_id, CredentialMode::CentrallyHeld, &replacement)
        .unwrap();

    let history = ctx.gateway_service.history(charity_id).unwrap();
    assert_eq!(history.len(), 2);
    let active: Vec<_> = history.iter().filter(|c| c.is_active).collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].mode, CredentialMode::CentrallyHeld);
    assert!(history
        .iter()
        .filter(|c| !c.is_active)
        .all(|c| c.deactivated_at.is_some()));

    assert_eq!(
        ctx.gateway_service.load_credentials(charity_id).unwrap(),
        replacement
    );
}

// ============================================================================
// CSV import
// ============================================================================

#[test]
fn test_csv_import_then_ready() {
    let dir = TempDir::new().unwrap();
    let ctx = open_context(dir.path(), RecordingTransport::new(acknowledgement()));
    let claim_id = draft_claim(&ctx);

    let csv_path = dir.path().join("donations.csv");
    std::fs::write(
        &csv_path,
        "Title,First name,Last name,House,Postcode,Date,Amount\n\
         Dr,Grace,Hopper,7,n1 9gu,01/05/2024,\"£1,000\"\n\
         ,Alan,Turing,9,M1 1AA,2024-05-20,20\n",
    )
    .unwrap();

    let result = ctx
        .import_service
        .import(&csv_path, claim_id, None, false)
        .unwrap();
    assert_eq!(result.imported, 2);

    let claim = ctx.lifecycle.transition_to_ready(claim_id).unwrap();
    assert_eq!(claim.total_amount, Decimal::new(102000, 2));

    let xml = ctx.lifecycle.render_envelope(claim_id).unwrap();
    assert!(xml.contains("<Total>1000.00</Total>"));
    assert!(xml.contains("<Ttl>Dr</Ttl>"));
}

// ============================================================================
// Event log
// ============================================================================

#[test]
fn test_lifecycle_events_are_logged() {
    let dir = TempDir::new().unwrap();
    std::env::set_var(CREDENTIALS_SECRET_ENV, SECRET);
    let logger = Arc::new(LoggingService::new(dir.path(), EntryPoint::Service, "test").unwrap());
    let ctx = GiftAidContext::open(
        dir.path(),
        Some(RecordingTransport::new(TransportOutcome::timeout("slow")) as Arc<dyn GatewayTransport>),
        Some(Arc::clone(&logger)),
    )
    .unwrap();

    let claim_id = ready_claim(&ctx);
    ctx.lifecycle.submit(claim_id).unwrap();

    let events: Vec<String> = logger
        .get_recent(10)
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&"claim_created".to_string()));
    assert!(events.contains(&"claim_marked_ready".to_string()));
    assert!(events.contains(&"claim_submission_failed".to_string()));
    assert_eq!(logger.error_count().unwrap(), 1);
}

#[test]
fn test_context_and_lifecycle_share_one_event_log() {
    let dir = TempDir::new().unwrap();
    std::env::set_var(CREDENTIALS_SECRET_ENV, SECRET);
    let logger = Arc::new(LoggingService::new(dir.path(), EntryPoint::Cli, "test").unwrap());
    {
        let transport: Arc<dyn GatewayTransport> = RecordingTransport::new(acknowledgement());
        let ctx =
            GiftAidContext::open(dir.path(), Some(transport), Some(Arc::clone(&logger))).unwrap();
        let shared = ctx.logger.as_ref().unwrap();
        assert!(Arc::ptr_eq(shared, &logger));

        draft_claim(&ctx);
        shared
            .log(LogEvent::new("command_executed").with_command("claim create"))
            .unwrap();
        shared
            .log(
                LogEvent::new("command_failed")
                    .with_command("claim ready")
                    .with_error("claim has no donation rows"),
            )
            .unwrap();
    }
    drop(logger);

    // Everything written through either path is on disk after reopening
    let reopened = LoggingService::new(dir.path(), EntryPoint::Cli, "test").unwrap();
    let entries = reopened.get_recent(10).unwrap();
    let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
    assert!(events.contains(&"claim_created"));
    assert!(events.contains(&"command_executed"));
    assert!(events.contains(&"command_failed"));
    let failed = entries.iter().find(|e| e.event == "command_failed").unwrap();
    assert_eq!(failed.command.as_deref(), Some("claim ready"));
    assert_eq!(reopened.error_count().unwrap(), 1);
}
