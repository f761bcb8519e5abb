//! GovTalk envelope builder for HMRC Charities (R68) claims
//!
//! Renders a frozen claim and its donation rows into the GovTalk XML
//! envelope, and renders the poll envelope used to fetch the outcome.
//!
//! Rendering is template based. Every interpolated value is either free text
//! (always XML-escaped) or a markup fragment produced by this module. After
//! rendering, the output is checked for leftover `{{` placeholders; finding
//! one is a [`Error::TemplateIntegrity`] and no document is returned.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::EnvelopeConfig;
use crate::domain::result::{Error, Result};
use crate::domain::{Charity, Claim, ClaimStatus, DonationRecord, GatewayCredentials, GatewayMode};

use super::validation;

/// GovTalk message class for Charities repayment claims
pub const MESSAGE_CLASS: &str = "HMRC-CHAR-CLM";

const SUBMISSION_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GovTalkMessage xmlns="http://www.govtalk.gov.uk/CM/envelope">
  <EnvelopeVersion>2.0</EnvelopeVersion>
  <Header>
    <MessageDetails>
      <Class>{{class}}</Class>
      <Qualifier>request</Qualifier>
      <Function>submit</Function>
      <CorrelationID>{{correlation_id}}</CorrelationID>
      <Transformation>XML</Transformation>
      <GatewayTest>{{gateway_test}}</GatewayTest>
      <GatewayTimestamp>{{gateway_timestamp}}</GatewayTimestamp>
    </MessageDetails>
    <SenderDetails>
      <IDAuthentication>
        <SenderID>{{sender_id}}</SenderID>
        <Authentication>
          <Method>clear</Method>
          <Role>principal</Role>
          <Value>{{password}}</Value>
        </Authentication>
      </IDAuthentication>
    </SenderDetails>
  </Header>
  <GovTalkDetails>
    <Keys>
      <Key Type="CHARID">{{hmrc_ref}}</Key>
    </Keys>
    <TargetDetails>
      <Organisation>HMRC</Organisation>
    </TargetDetails>
    <ChannelRouting>
      <Channel>
        <URI>{{vendor_id}}</URI>
        <Product>{{product_name}}</Product>
        <Version>{{product_version}}</Version>
      </Channel>
    </ChannelRouting>
  </GovTalkDetails>
  <Body>
    <IRenvelope xmlns="http://www.govtalk.gov.uk/taxation/charities/r68/2">
      <IRheader>
        <Keys>
          <Key Type="CHARID">{{hmrc_ref}}</Key>
        </Keys>
        <PeriodEnd>{{period_end}}</PeriodEnd>
        <DefaultCurrency>GBP</DefaultCurrency>
        <IRmark Type="generic">{{ir_mark}}</IRmark>
        <Sender>Individual</Sender>
      </IRheader>
      <R68>
        <AuthOfficial>
          <OffName>
{{official_title}}            <Fore>{{official_forename}}</Fore>
            <Sur>{{official_surname}}</Sur>
          </OffName>
          <OffID>
            <Postcode>{{official_postcode}}</Postcode>
          </OffID>
          <Phone>{{official_phone}}</Phone>
        </AuthOfficial>
        <Declaration>yes</Declaration>
        <Claim>
          <OrgName>{{org_name}}</OrgName>
          <HMRCref>{{hmrc_ref}}</HMRCref>
{{regulator}}          <Repayment>
{{donation_rows}}            <EarliestGAdate>{{earliest_date}}</EarliestGAdate>
          </Repayment>
          <GASDS>
            <ConnectedCharities>no</ConnectedCharities>
            <CommBldgs>no</CommBldgs>
          </GASDS>
        </Claim>
      </R68>
    </IRenvelope>
  </Body>
</GovTalkMessage>
"#;

const DONATION_ROW_TEMPLATE: &str = r#"            <GAD>
              <Donor>
{{title}}                <Fore>{{first_name}}</Fore>
                <Sur>{{last_name}}</Sur>
                <House>{{address}}</House>
                <Postcode>{{postcode}}</Postcode>
              </Donor>
              <Date>{{date}}</Date>
              <Total>{{total}}</Total>
            </GAD>
"#;

const REGULATOR_TEMPLATE: &str = r#"          <Regulator>
            <RegName>{{reg_name}}</RegName>
            <RegNo>{{reg_no}}</RegNo>
          </Regulator>
"#;

const POLL_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<GovTalkMessage xmlns="http://www.govtalk.gov.uk/CM/envelope">
  <EnvelopeVersion>2.0</EnvelopeVersion>
  <Header>
    <MessageDetails>
      <Class>{{class}}</Class>
      <Qualifier>poll</Qualifier>
      <Function>poll</Function>
      <CorrelationID>{{correlation_id}}</CorrelationID>
      <Transformation>XML</Transformation>
      <GatewayTest>{{gateway_test}}</GatewayTest>
    </MessageDetails>
    <SenderDetails>
      <IDAuthentication>
        <SenderID>{{sender_id}}</SenderID>
        <Authentication>
          <Method>clear</Method>
          <Role>principal</Role>
          <Value>{{password}}</Value>
        </Authentication>
      </IDAuthentication>
    </SenderDetails>
  </Header>
  <GovTalkDetails>
    <Keys/>
  </GovTalkDetails>
  <Body/>
</GovTalkMessage>
"#;

/// A value substituted into a template
enum Slot {
    /// Untrusted text, escaped on the way in
    Text(String),
    /// Markup produced by this module from already-escaped parts
    Markup(String),
}

fn text(value: impl Into<String>) -> Slot {
    Slot::Text(value.into())
}

/// Escape XML special characters: `& < > " '`
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape for interpolation into a template
///
/// On top of XML escaping, `{` becomes a character reference so user text can
/// never look like a placeholder to the integrity check.
fn escape_slot_text(value: &str) -> String {
    escape_xml(value).replace('{', "&#123;")
}

/// Render money with exactly two decimal places (10 -> "10.00")
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// ISO calendar date
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Substitute `{{name}}` placeholders
///
/// Unknown placeholders are left in place for [`ensure_resolved`] to catch.
fn render_template(template: &str, slots: &[(&str, Slot)]) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        match slots.iter().find(|(key, _)| *key == name) {
            Some((_, Slot::Text(value))) => out.push_str(&escape_slot_text(value)),
            Some((_, Slot::Markup(value))) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Fail if any `{{` survived rendering
fn ensure_resolved(rendered: &str) -> Result<()> {
    if let Some(pos) = rendered.find("{{") {
        let snippet: String = rendered[pos..].chars().take(48).collect();
        return Err(Error::TemplateIntegrity {
            snippet: snippet.lines().next().unwrap_or_default().to_string(),
        });
    }
    Ok(())
}

fn render_checked(template: &str, slots: &[(&str, Slot)]) -> Result<String> {
    let rendered = render_template(template, slots);
    ensure_resolved(&rendered)?;
    Ok(rendered)
}

/// Optional single-line element, empty when the value is absent
fn optional_element(indent: &str, name: &str, value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => format!("{}<{}>{}</{}>\n", indent, name, escape_slot_text(v), name),
        None => String::new(),
    }
}

/// Earliest donation date, or the period start for an empty claim
pub fn earliest_donation_date(claim: &Claim, items: &[DonationRecord]) -> NaiveDate {
    items
        .iter()
        .map(|item| item.donation_date)
        .min()
        .unwrap_or(claim.period_start)
}

/// Builds GovTalk envelopes for one gateway mode
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    config: EnvelopeConfig,
    mode: GatewayMode,
}

impl EnvelopeBuilder {
    pub fn new(config: EnvelopeConfig, mode: GatewayMode) -> Self {
        Self { config, mode }
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    /// Render the submission envelope for a frozen claim
    pub fn build(
        &self,
        claim: &Claim,
        items: &[DonationRecord],
        charity: &Charity,
        credentials: &GatewayCredentials,
    ) -> Result<String> {
        self.build_at(claim, items, charity, credentials, Utc::now())
    }

    /// Same as [`build`](Self::build) with an explicit clock
    ///
    /// `now` only reaches the output in local-test-service mode.
    pub fn build_at(
        &self,
        claim: &Claim,
        items: &[DonationRecord],
        charity: &Charity,
        credentials: &GatewayCredentials,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if claim.status == ClaimStatus::Draft {
            return Err(Error::state(format!(
                "claim {} is still a draft; mark it ready before building the envelope",
                claim.id
            )));
        }
        if charity.id != claim.charity_id {
            return Err(Error::state(format!(
                "charity {} does not own claim {}",
                charity.id, claim.id
            )));
        }
        let hmrc_ref = charity.validated_hmrc_ref()?;
        if charity.name.trim().is_empty() {
            return Err(Error::configuration(format!(
                "charity {} has no name",
                charity.id
            )));
        }

        // Validate every row before rendering anything
        let mut rows = String::new();
        for item in items {
            if item.claim_id != claim.id {
                return Err(Error::state(format!(
                    "donation {} belongs to claim {}, not {}",
                    item.id, item.claim_id, claim.id
                )));
            }
            let postcode = validation::validate_record(item)?;
            rows.push_str(&render_template(
                DONATION_ROW_TEMPLATE,
                &[
                    (
                        "title",
                        Slot::Markup(optional_element(
                            "                ",
                            "Ttl",
                            item.title.as_deref(),
                        )),
                    ),
                    ("first_name", text(item.first_name.trim())),
                    ("last_name", text(item.last_name.trim())),
                    ("address", text(item.address.trim())),
                    ("postcode", text(postcode)),
                    ("date", text(format_date(item.donation_date))),
                    ("total", text(format_money(item.amount))),
                ],
            ));
        }

        let regulator = match charity.regulator_number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => render_template(
                REGULATOR_TEMPLATE,
                &[
                    ("reg_name", text(self.config.regulator_name.as_str())),
                    ("reg_no", text(number)),
                ],
            ),
            _ => String::new(),
        };

        let (correlation_id, timestamp) = if self.mode.populates_header() {
            (
                claim.derived_correlation_id(),
                now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            )
        } else {
            (String::new(), String::new())
        };

        let official = &self.config.authorised_official;

        render_checked(
            SUBMISSION_TEMPLATE,
            &[
                ("class", text(MESSAGE_CLASS)),
                ("correlation_id", text(correlation_id)),
                ("gateway_test", text(self.mode.gateway_test_flag())),
                ("gateway_timestamp", text(timestamp)),
                ("sender_id", text(credentials.sender_id.as_str())),
                ("password", text(credentials.password.as_str())),
                ("hmrc_ref", text(hmrc_ref)),
                ("vendor_id", text(self.config.vendor_id.as_str())),
                ("product_name", text(self.config.product_name.as_str())),
                ("product_version", text(self.config.product_version.as_str())),
                ("period_end", text(format_date(claim.period_end))),
                ("ir_mark", text("")),
                (
                    "official_title",
                    Slot::Markup(optional_element(
                        "            ",
                        "Ttl",
                        official.title.as_deref(),
                    )),
                ),
                ("official_forename", text(official.forename.as_str())),
                ("official_surname", text(official.surname.as_str())),
                ("official_postcode", text(official.postcode.trim().to_uppercase())),
                ("official_phone", text(official.phone.as_str())),
                ("org_name", text(charity.name.trim())),
                ("regulator", Slot::Markup(regulator)),
                ("donation_rows", Slot::Markup(rows)),
                (
                    "earliest_date",
                    text(format_date(earliest_donation_date(claim, items))),
                ),
            ],
        )
    }

    /// Render the poll envelope for a previously issued correlation id
    pub fn build_poll(
        &self,
        correlation_id: &str,
        credentials: &GatewayCredentials,
    ) -> Result<String> {
        poll_envelope(self.mode, correlation_id, credentials)
    }
}

/// Poll envelope: prior correlation id, sender credentials, empty body
pub fn poll_envelope(
    mode: GatewayMode,
    correlation_id: &str,
    credentials: &GatewayCredentials,
) -> Result<String> {
    let correlation_id = correlation_id.trim();
    if correlation_id.is_empty() {
        return Err(Error::validation("correlation_id", "is required to poll"));
    }

    render_checked(
        POLL_TEMPLATE,
        &[
            ("class", text(MESSAGE_CLASS)),
            ("correlation_id", text(correlation_id)),
            ("gateway_test", text(mode.gateway_test_flag())),
            ("sender_id", text(credentials.sender_id.as_str())),
            ("password", text(credentials.password.as_str())),
        ],
    )
}
