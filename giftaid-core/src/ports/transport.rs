//! Gateway transport port
//!
//! Defines how claim envelopes reach the tax authority gateway. The
//! lifecycle talks to this trait only, so it can run against the real HTTP
//! client or a stub.

use crate::domain::result::Result;
use crate::domain::{GatewayCredentials, TransportOutcome};

/// Gateway transport trait
///
/// Network problems are not errors here: every attempt that got as far as
/// the wire comes back as a [`TransportOutcome`] whose kind tells timeout,
/// network failure and non-2xx responses apart.
pub trait GatewayTransport: Send + Sync {
    /// Post a submission envelope
    fn submit(&self, xml: &str) -> TransportOutcome;

    /// Build and post a poll envelope for a prior submission
    ///
    /// Fails only when the poll envelope itself cannot be built.
    fn poll(&self, correlation_id: &str, credentials: &GatewayCredentials)
        -> Result<TransportOutcome>;
}
