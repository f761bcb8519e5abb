//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod charity;
pub mod envelope;
pub mod gateway;
pub mod import;
pub mod lifecycle;
pub mod logging;
pub mod migration;
pub mod validation;
pub mod vault;

pub use charity::CharityService;
pub use envelope::EnvelopeBuilder;
pub use gateway::GatewayService;
pub use import::{DonationPreview, ImportResult, ImportService, RowError};
pub use lifecycle::{ClaimDetail, ClaimLifecycle, PollResult, SubmitResult};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use vault::CredentialVault;
