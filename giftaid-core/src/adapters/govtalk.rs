//! GovTalk HTTP transport
//!
//! Posts envelopes to the Transaction Engine submission and poll endpoints
//! with a blocking reqwest client under a hard timeout.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use crate::config::GatewaySettings;
use crate::domain::result::{Error, Result};
use crate::domain::{GatewayCredentials, GatewayMode, GatewayReply, TransportOutcome};
use crate::ports::GatewayTransport;
use crate::services::envelope;

/// Blocking HTTP client for the GovTalk gateway
#[derive(Debug)]
pub struct TransportClient {
    client: Client,
    mode: GatewayMode,
    submission_url: Url,
    poll_url: Url,
    timeout: Duration,
}

impl TransportClient {
    /// Create a client from gateway settings
    pub fn new(settings: &GatewaySettings) -> Result<Self> {
        Self::with_endpoints(
            settings.mode,
            &settings.submission_url(),
            &settings.poll_url(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    /// Create a client with explicit endpoints
    pub fn with_endpoints(
        mode: GatewayMode,
        submission_url: &str,
        poll_url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let submission_url = parse_endpoint(mode, "submission", submission_url)?;
        let poll_url = parse_endpoint(mode, "poll", poll_url)?;

        let mut builder = Client::builder().timeout(timeout);
        if mode == GatewayMode::LocalTestService {
            // The local test service runs on this machine
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            mode,
            submission_url,
            poll_url,
            timeout,
        })
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    pub fn submission_url(&self) -> &Url {
        &self.submission_url
    }

    pub fn poll_url(&self) -> &Url {
        &self.poll_url
    }

    fn post(&self, url: &Url, body: String) -> TransportOutcome {
        let response = match self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "text/xml")
            .header(ACCEPT, "text/xml, application/xml")
            .body(body)
            .send()
        {
            Ok(response) => response,
            Err(e) => return self.map_request_error(url, e),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.text() {
            Ok(body) => body,
            Err(e) => return self.map_request_error(url, e),
        };

        if status.is_success() {
            TransportOutcome::delivered(status.as_u16(), body, content_type)
        } else {
            TransportOutcome::http_error(status.as_u16(), body, content_type)
        }
    }

    fn map_request_error(&self, url: &Url, error: reqwest::Error) -> TransportOutcome {
        if error.is_timeout() {
            TransportOutcome::timeout(format!(
                "no response within {}s",
                self.timeout.as_secs_f64()
            ))
        } else if error.is_connect() {
            TransportOutcome::network(format!(
                "unable to connect to {}: {}",
                url.host_str().unwrap_or("gateway"),
                error
            ))
        } else {
            TransportOutcome::network(format!("request failed: {}", error))
        }
    }
}

impl GatewayTransport for TransportClient {
    fn submit(&self, xml: &str) -> TransportOutcome {
        self.post(&self.submission_url, xml.to_string())
    }

    fn poll(
        &self,
        correlation_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<TransportOutcome> {
        let xml = envelope::poll_envelope(self.mode, correlation_id, credentials)?;
        Ok(self.post(&self.poll_url, xml))
    }
}

fn parse_endpoint(mode: GatewayMode, name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        Error::configuration(format!("invalid {} endpoint '{}': {}", name, raw, e))
    })?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if !mode.requires_https() => Ok(url),
        scheme => Err(Error::configuration(format!(
            "{} endpoint must use https in {} mode (got {})",
            name, mode, scheme
        ))),
    }
}

// =============================================================================
// GovTalk response parsing
// =============================================================================

fn element_pattern(name: &str) -> Regex {
    // Namespace prefixes are optional on every element
    Regex::new(&format!(
        r"(?s)<(?:[\w-]+:)?{name}(?:\s[^>]*)?>\s*(.*?)\s*</(?:[\w-]+:)?{name}>"
    ))
    .expect("static regex")
}

fn qualifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| element_pattern("Qualifier"))
}

fn correlation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| element_pattern("CorrelationID"))
}

fn error_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| element_pattern("Error"))
}

fn type_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| element_pattern("Type"))
}

fn text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| element_pattern("Text"))
}

fn capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|s| !s.is_empty())
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Pull the qualifier, correlation id and first error out of a GovTalk reply
///
/// Anything that is not a GovTalk message yields an empty reply.
pub fn parse_reply(body: &str) -> GatewayReply {
    let error_block = error_pattern()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    GatewayReply {
        qualifier: capture(qualifier_pattern(), body).map(|q| q.to_lowercase()),
        correlation_id: capture(correlation_pattern(), body),
        error_type: error_block
            .as_deref()
            .and_then(|block| capture(type_pattern(), block))
            .map(|t| t.to_lowercase()),
        error_text: error_block
            .as_deref()
            .and_then(|block| capture(text_pattern(), block)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_mode_requires_https() {
        let err = TransportClient::with_endpoints(
            GatewayMode::LiveGateway,
            "http://gateway.example/submit",
            "https://gateway.example/poll",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_local_mode_allows_http() {
        let client = TransportClient::with_endpoints(
            GatewayMode::LocalTestService,
            "http://localhost:5665/LTS/LTSPostServlet",
            "http://localhost:5665/LTS/LTSPostServlet",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.submission_url().port(), Some(5665));
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let err = TransportClient::with_endpoints(
            GatewayMode::TestGateway,
            "not a url",
            "https://gateway.example/poll",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_default_settings_build_a_client() {
        let client = TransportClient::new(&GatewaySettings::default()).unwrap();
        assert_eq!(client.mode(), GatewayMode::TestGateway);
        assert_eq!(client.poll_url().path(), "/poll");
    }

    #[test]
    fn test_parse_acknowledgement() {
        let body = r#"<?xml version="1.0"?>
<GovTalkMessage xmlns="http://www.govtalk.gov.uk/CM/envelope">
  <Header>
    <MessageDetails>
      <Class>HMRC-CHAR-CLM</Class>
      <Qualifier>acknowledgement</Qualifier>
      <Function>submit</Function>
      <CorrelationID>B07B9ED3176E4B1A9E5B4E9A2F6C1D22</CorrelationID>
    </MessageDetails>
  </Header>
</GovTalkMessage>"#;
        let reply = parse_reply(body);
        assert_eq!(reply.qualifier.as_deref(), Some("acknowledgement"));
        assert_eq!(
            reply.correlation_id.as_deref(),
            Some("B07B9ED3176E4B1A9E5B4E9A2F6C1D22")
        );
        assert!(reply.error_type.is_none());
    }

    #[test]
    fn test_parse_business_error_with_prefixes() {
        let body = r#"<gt:GovTalkMessage xmlns:gt="http://www.govtalk.gov.uk/CM/envelope">
  <gt:Header><gt:MessageDetails>
    <gt:Qualifier>error</gt:Qualifier>
    <gt:CorrelationID>ABC</gt:CorrelationID>
  </gt:MessageDetails></gt:Header>
  <gt:GovTalkDetails><gt:GovTalkErrors>
    <gt:Error>
      <gt:RaisedBy>Department</gt:RaisedBy>
      <gt:Number>7001</gt:Number>
      <gt:Type>business</gt:Type>
      <gt:Text>HMRCref &amp; OrgName do not match</gt:Text>
    </gt:Error>
  </gt:GovTalkErrors></gt:GovTalkDetails>
</gt:GovTalkMessage>"#;
        let reply = parse_reply(body);
        assert_eq!(reply.qualifier.as_deref(), Some("error"));
        assert_eq!(reply.error_type.as_deref(), Some("business"));
        assert_eq!(
            reply.error_text.as_deref(),
            Some("HMRCref & OrgName do not match")
        );
    }

    #[test]
    fn test_parse_non_govtalk_body() {
        assert_eq!(parse_reply("<html>Bad gateway</html>"), GatewayReply::default());
        assert_eq!(parse_reply(""), GatewayReply::default());
    }
}
