//! Configuration management
//!
//! Settings live in `settings.json` inside the giftaid directory:
//! ```json
//! {
//!   "gateway": { "mode": "test-gateway", "timeoutSecs": 25 },
//!   "envelope": { "vendorId": "1234", "regulatorName": "CCEW", ... },
//!   "importColumns": { "firstName": "Forename", ... }
//! }
//! ```
//!
//! The credentials secret is never written to disk; it only comes from
//! the `GIFTAID_CREDENTIALS_SECRET` environment variable.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::GatewayMode;

/// Environment variable overriding the gateway mode (test, live, local)
pub const GATEWAY_MODE_ENV: &str = "GIFTAID_GATEWAY_MODE";

/// Environment variable holding the credential vault secret
pub const CREDENTIALS_SECRET_ENV: &str = "GIFTAID_CREDENTIALS_SECRET";

/// Reference transport timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 25;

const TEST_SUBMISSION_URL: &str = "https://test-transaction-engine.tax.service.gov.uk/submission";
const TEST_POLL_URL: &str = "https://test-transaction-engine.tax.service.gov.uk/poll";
const LIVE_SUBMISSION_URL: &str = "https://transaction-engine.tax.service.gov.uk/submission";
const LIVE_POLL_URL: &str = "https://transaction-engine.tax.service.gov.uk/poll";
const LOCAL_SERVICE_URL: &str = "http://localhost:5665/LTS/LTSPostServlet";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    gateway: GatewaySettings,
    #[serde(default)]
    envelope: EnvelopeConfig,
    #[serde(default)]
    import_columns: DonationColumns,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Gateway transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    #[serde(default)]
    pub mode: GatewayMode,
    /// Overrides the per-mode default submission endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_url: Option<String>,
    /// Overrides the per-mode default poll endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            mode: GatewayMode::default(),
            submission_url: None,
            poll_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl GatewaySettings {
    /// Submission endpoint: explicit override, else the mode's default
    pub fn submission_url(&self) -> String {
        self.submission_url.clone().unwrap_or_else(|| {
            match self.mode {
                GatewayMode::TestGateway => TEST_SUBMISSION_URL,
                GatewayMode::LiveGateway => LIVE_SUBMISSION_URL,
                GatewayMode::LocalTestService => LOCAL_SERVICE_URL,
            }
            .to_string()
        })
    }

    /// Poll endpoint: explicit override, else the mode's default
    pub fn poll_url(&self) -> String {
        self.poll_url.clone().unwrap_or_else(|| {
            match self.mode {
                GatewayMode::TestGateway => TEST_POLL_URL,
                GatewayMode::LiveGateway => LIVE_POLL_URL,
                GatewayMode::LocalTestService => LOCAL_SERVICE_URL,
            }
            .to_string()
        })
    }
}

/// The authorised official who signs the R68 declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficialDetails {
    #[serde(default)]
    pub title: Option<String>,
    pub forename: String,
    pub surname: String,
    pub postcode: String,
    pub phone: String,
}

impl Default for OfficialDetails {
    fn default() -> Self {
        Self {
            title: None,
            forename: "Authorised".to_string(),
            surname: "Official".to_string(),
            postcode: "AB1 2CD".to_string(),
            phone: "01234567890".to_string(),
        }
    }
}

/// Envelope values that are fixed per installation
///
/// Passed to `EnvelopeBuilder` explicitly; the builder never reads the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeConfig {
    pub vendor_id: String,
    pub product_name: String,
    pub product_version: String,
    #[serde(default)]
    pub authorised_official: OfficialDetails,
    /// Regulator name used with the charity's regulator number (e.g. CCEW)
    pub regulator_name: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            vendor_id: "0000".to_string(),
            product_name: "giftaid".to_string(),
            product_version: env!("CARGO_PKG_VERSION").to_string(),
            authorised_official: OfficialDetails::default(),
            regulator_name: "CCEW".to_string(),
        }
    }
}

/// CSV header names for donation import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationColumns {
    #[serde(default)]
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub postcode: String,
    pub date: String,
    pub amount: String,
}

impl Default for DonationColumns {
    fn default() -> Self {
        Self {
            title: Some("Title".to_string()),
            first_name: "First name".to_string(),
            last_name: "Last name".to_string(),
            address: "House".to_string(),
            postcode: "Postcode".to_string(),
            date: "Date".to_string(),
            amount: "Amount".to_string(),
        }
    }
}

/// Gift Aid configuration (resolved view of settings + environment)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewaySettings,
    pub envelope: EnvelopeConfig,
    pub import_columns: DonationColumns,
    /// Vault secret from the environment; never persisted
    pub credentials_secret: Option<String>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the giftaid directory
    ///
    /// The gateway mode can be overridden with `GIFTAID_GATEWAY_MODE`.
    pub fn load(giftaid_dir: &Path) -> Result<Self> {
        let settings_path = giftaid_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)?
        } else {
            SettingsFile::default()
        };

        let mut gateway = raw.gateway.clone();
        if let Ok(mode) = std::env::var(GATEWAY_MODE_ENV) {
            gateway.mode = mode.parse()?;
        }

        let credentials_secret = std::env::var(CREDENTIALS_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty());

        Ok(Self {
            gateway,
            envelope: raw.envelope.clone(),
            import_columns: raw.import_columns.clone(),
            credentials_secret,
            _raw_settings: raw,
        })
    }

    /// Save config to the giftaid directory
    ///
    /// Preserves keys this crate does not manage. The secret is not written.
    pub fn save(&self, giftaid_dir: &Path) -> Result<()> {
        let settings_path = giftaid_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            SettingsFile::default()
        };

        settings.gateway = self.gateway.clone();
        settings.envelope = self.envelope.clone();
        settings.import_columns = self.import_columns.clone();

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
