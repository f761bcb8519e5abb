//! Gateway domain models: modes, credentials, connections, transport outcomes

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};

/// Which GovTalk endpoint family a submission targets
///
/// Header policy hangs off this enum: the real gateways assign correlation id
/// and timestamp themselves, the Local Test Service needs them filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayMode {
    #[default]
    TestGateway,
    LiveGateway,
    LocalTestService,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::TestGateway => "test-gateway",
            GatewayMode::LiveGateway => "live-gateway",
            GatewayMode::LocalTestService => "local-test-service",
        }
    }

    /// Value of the `GatewayTest` header field
    pub fn gateway_test_flag(&self) -> &'static str {
        match self {
            GatewayMode::LiveGateway => "0",
            GatewayMode::TestGateway | GatewayMode::LocalTestService => "1",
        }
    }

    /// Whether the envelope header carries our own correlation id and timestamp
    pub fn populates_header(&self) -> bool {
        matches!(self, GatewayMode::LocalTestService)
    }

    /// Plain HTTP is only acceptable against a local test service
    pub fn requires_https(&self) -> bool {
        !matches!(self, GatewayMode::LocalTestService)
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "test" | "test-gateway" => Ok(GatewayMode::TestGateway),
            "live" | "live-gateway" => Ok(GatewayMode::LiveGateway),
            "local" | "lts" | "local-test-service" => Ok(GatewayMode::LocalTestService),
            other => Err(Error::configuration(format!(
                "unknown gateway mode '{}' (expected test, live or local)",
                other
            ))),
        }
    }
}

/// Who holds the gateway credentials for a charity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialMode {
    /// The charity's own Government Gateway user id
    CharityHeld,
    /// Credentials held centrally by the operator on the charity's behalf
    CentrallyHeld,
}

impl CredentialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialMode::CharityHeld => "charity-held",
            CredentialMode::CentrallyHeld => "centrally-held",
        }
    }
}

impl FromStr for CredentialMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "charity" | "charity-held" => Ok(CredentialMode::CharityHeld),
            "central" | "centrally-held" => Ok(CredentialMode::CentrallyHeld),
            other => Err(Error::validation(
                "mode",
                format!("unknown credential mode '{}'", other),
            )),
        }
    }
}

/// Government Gateway sender credentials (plaintext; only ever held in memory)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCredentials {
    pub sender_id: String,
    pub password: String,
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("sender_id", &self.sender_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl GatewayCredentials {
    pub fn new(sender_id: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let sender_id = sender_id.into().trim().to_string();
        let password = password.into();
        if sender_id.is_empty() {
            return Err(Error::validation("sender_id", "is required"));
        }
        if password.is_empty() {
            return Err(Error::validation("password", "is required"));
        }
        Ok(Self {
            sender_id,
            password,
        })
    }
}

/// A stored credential set for one charity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConnection {
    pub id: Uuid,
    pub charity_id: Uuid,
    pub mode: CredentialMode,
    /// Opaque output of `CredentialVault::encrypt`
    pub encrypted_credentials: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl GatewayConnection {
    pub fn new(charity_id: Uuid, mode: CredentialMode, encrypted_credentials: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            charity_id,
            mode,
            encrypted_credentials,
            is_active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }
}

/// How a transport call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// 2xx response
    Delivered,
    /// Non-2xx response
    HttpError,
    /// No response within the configured timeout
    Timeout,
    /// Connection refused, DNS failure, TLS failure and the like
    Network,
}

/// Result of posting an envelope to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOutcome {
    pub kind: OutcomeKind,
    pub success: bool,
    /// HTTP status, 0 when no response arrived
    pub http_status: u16,
    /// Raw response body, kept verbatim for audit
    pub body: String,
    pub content_type: Option<String>,
    /// Transport-level detail for timeout/network failures
    pub detail: Option<String>,
}

impl TransportOutcome {
    pub fn delivered(http_status: u16, body: String, content_type: Option<String>) -> Self {
        Self {
            kind: OutcomeKind::Delivered,
            success: true,
            http_status,
            body,
            content_type,
            detail: None,
        }
    }

    pub fn http_error(http_status: u16, body: String, content_type: Option<String>) -> Self {
        Self {
            kind: OutcomeKind::HttpError,
            success: false,
            http_status,
            body,
            content_type,
            detail: None,
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::without_response(OutcomeKind::Timeout, detail)
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::without_response(OutcomeKind::Network, detail)
    }

    fn without_response(kind: OutcomeKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            http_status: 0,
            body: String::new(),
            content_type: None,
            detail: Some(detail.into()),
        }
    }
}

/// What the gateway said inside a GovTalk response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReply {
    /// `acknowledgement`, `response` or `error`
    pub qualifier: Option<String>,
    pub correlation_id: Option<String>,
    /// First GovTalk error type (`fatal`, `business`, ...)
    pub error_type: Option<String>,
    pub error_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_mode_parsing() {
        assert_eq!("test".parse::<GatewayMode>().unwrap(), GatewayMode::TestGateway);
        assert_eq!("LIVE".parse::<GatewayMode>().unwrap(), GatewayMode::LiveGateway);
        assert_eq!(
            "local-test-service".parse::<GatewayMode>().unwrap(),
            GatewayMode::LocalTestService
        );
        assert!(matches!(
            "staging".parse::<GatewayMode>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_header_policy_per_mode() {
        assert!(!GatewayMode::TestGateway.populates_header());
        assert!(!GatewayMode::LiveGateway.populates_header());
        assert!(GatewayMode::LocalTestService.populates_header());
        assert_eq!(GatewayMode::LiveGateway.gateway_test_flag(), "0");
        assert_eq!(GatewayMode::TestGateway.gateway_test_flag(), "1");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = GatewayCredentials::new("sender", "s3cret").unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("sender"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(GatewayCredentials::new("  ", "pw").is_err());
        assert!(GatewayCredentials::new("id", "").is_err());
    }

    #[test]
    fn test_outcome_constructors() {
        let timeout = TransportOutcome::timeout("25s elapsed");
        assert_eq!(timeout.kind, OutcomeKind::Timeout);
        assert!(!timeout.success);
        assert_eq!(timeout.http_status, 0);

        let ok = TransportOutcome::delivered(200, "<GovTalkMessage/>".into(), None);
        assert!(ok.success);
    }
}
