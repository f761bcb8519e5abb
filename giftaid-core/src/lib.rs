//! Gift Aid Core - claim preparation and GovTalk submission
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Charity, Claim, DonationRecord, etc.)
//! - **ports**: Trait definitions for external dependencies (GatewayTransport)
//! - **services**: Business logic orchestration (lifecycle, envelope, vault)
//! - **adapters**: Concrete implementations (DuckDB, GovTalk HTTP)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbRepository;
use adapters::govtalk::TransportClient;
use config::Config;
use ports::GatewayTransport;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult};
pub use domain::{
    Charity, Claim, ClaimStatus, CredentialMode, DonationInput, DonationRecord,
    GatewayConnection, GatewayCredentials, GatewayMode, NewCharity, NewClaim, TransportOutcome,
};

/// Main context for Gift Aid operations
///
/// This is the primary entry point for all business logic. It holds
/// the database connection, configuration, and all services.
pub struct GiftAidContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub charity_service: CharityService,
    pub gateway_service: Arc<GatewayService>,
    pub lifecycle: Arc<ClaimLifecycle>,
    pub import_service: ImportService,
    /// Event log shared with the lifecycle, if one was supplied
    pub logger: Option<Arc<LoggingService>>,
}

impl GiftAidContext {
    /// Open the context with the configured HTTP transport and no event log
    pub fn new(giftaid_dir: &Path) -> Result<Self> {
        Self::open(giftaid_dir, None, None)
    }

    /// Open the context
    ///
    /// `transport` replaces the HTTP client built from settings; `logger`
    /// receives lifecycle events.
    pub fn open(
        giftaid_dir: &Path,
        transport: Option<Arc<dyn GatewayTransport>>,
        logger: Option<Arc<LoggingService>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(giftaid_dir)
            .with_context(|| format!("Failed to create {}", giftaid_dir.display()))?;
        let config = Config::load(giftaid_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&giftaid_dir.join("giftaid.duckdb"))?);
        repository.ensure_schema()?;

        let transport = match transport {
            Some(transport) => transport,
            None => Arc::new(TransportClient::new(&config.gateway)?),
        };

        let charity_service = CharityService::new(Arc::clone(&repository));
        let gateway_service = Arc::new(GatewayService::new(
            Arc::clone(&repository),
            config.credentials_secret.clone(),
        ));

        let mut lifecycle = ClaimLifecycle::new(
            Arc::clone(&repository),
            Arc::clone(&gateway_service),
            EnvelopeBuilder::new(config.envelope.clone(), config.gateway.mode),
            transport,
        );
        if let Some(logger) = &logger {
            lifecycle = lifecycle.with_logger(Arc::clone(logger));
        }
        let lifecycle = Arc::new(lifecycle);

        let import_service =
            ImportService::new(Arc::clone(&lifecycle), config.import_columns.clone());

        Ok(Self {
            config,
            repository,
            charity_service,
            gateway_service,
            lifecycle,
            import_service,
            logger,
        })
    }
}
