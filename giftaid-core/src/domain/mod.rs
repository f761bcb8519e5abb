//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

mod charity;
pub mod claim;
mod donation;
mod gateway;
pub mod result;

pub use charity::{normalize_hmrc_ref, Charity, NewCharity};
pub use claim::{derive_correlation_id, Claim, ClaimStatus, NewClaim};
pub use donation::{DonationInput, DonationRecord, ValidDonation};
pub use gateway::{
    CredentialMode, GatewayConnection, GatewayCredentials, GatewayMode, GatewayReply,
    OutcomeKind, TransportOutcome,
};
