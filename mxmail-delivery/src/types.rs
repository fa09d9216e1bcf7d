//! Type definitions for a single direct delivery.

use std::{fmt, time::Duration};

use mxmail_smtp::client::{MessageBuilder, RenderedMessage};
use serde::{Deserialize, Serialize};

use crate::{dns::recipient_domain, error::DeliveryError};

pub const DEFAULT_SENDER_NAME: &str = "Competitor Intel";
pub const DEFAULT_SENDER_ADDRESS: &str = "intel@mxmail.localdomain";

/// The fixed identity every message is sent as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    /// Display name used in the From header
    pub display_name: String,
    /// Envelope sender and From address
    pub address: String,
}

impl Default for SenderIdentity {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_SENDER_NAME.to_string(),
            address: DEFAULT_SENDER_ADDRESS.to_string(),
        }
    }
}

impl SenderIdentity {
    /// The domain part of the sender address, if it has one.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        recipient_domain(&self.address)
    }
}

/// One message for one recipient. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    recipient: String,
    subject: String,
    html_body: String,
    sender: SenderIdentity,
}

impl OutboundMessage {
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidRecipient` if the recipient has no
    /// domain part or contains whitespace, and `DeliveryError::InvalidMessage`
    /// if the subject spans more than one line.
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        sender: SenderIdentity,
    ) -> Result<Self, DeliveryError> {
        let recipient = recipient.into();
        let subject = subject.into();

        if recipient_domain(&recipient).is_none() || recipient.contains(char::is_whitespace) {
            return Err(DeliveryError::InvalidRecipient(recipient));
        }
        if subject.contains(['\r', '\n']) {
            return Err(DeliveryError::InvalidMessage(
                "Subject must not contain line breaks".to_string(),
            ));
        }

        Ok(Self {
            recipient,
            subject,
            html_body: html_body.into(),
            sender,
        })
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// The recipient domain; always present for a constructed message.
    #[must_use]
    pub fn domain(&self) -> &str {
        recipient_domain(&self.recipient).unwrap_or_default()
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    #[must_use]
    pub const fn sender(&self) -> &SenderIdentity {
        &self.sender
    }

    /// Renders headers and body for the DATA phase.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InvalidMessage` if a header cannot be rendered.
    pub fn render(&self) -> Result<RenderedMessage, DeliveryError> {
        Ok(MessageBuilder::new()
            .from(&self.sender.display_name, &self.sender.address)
            .to(&self.recipient)
            .subject(&self.subject)
            .html_body(&self.html_body)
            .build()?)
    }
}

/// Acknowledgment of a message accepted by the exchanger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// The `Message-ID` header of the delivered message
    pub message_id: String,
    /// The exchanger that accepted it
    pub host: String,
    /// The exchanger's final reply line, e.g. `250 2.0.0 Ok: queued as 1A2B`
    pub response: String,
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}: {}", self.message_id, self.host, self.response)
    }
}

/// Progress of one invocation, as reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Start,
    DomainExtracted,
    MxResolved,
    Connected,
    Submitted,
    Done,
    Failed,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::DomainExtracted => "DOMAIN_EXTRACTED",
            Self::MxResolved => "MX_RESOLVED",
            Self::Connected => "CONNECTED",
            Self::Submitted => "SUBMITTED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// SMTP operation timeout configuration
///
/// An expired wait fails the delivery as a transport failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for TCP connection establishment and the greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for EHLO/HELO commands
    ///
    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// Timeout for MAIL FROM command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Timeout for RCPT TO command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT command
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

impl SmtpTimeouts {
    /// Every stage bounded by the same duration. Handy for tests.
    #[must_use]
    pub const fn uniform(secs: u64) -> Self {
        Self {
            connect_secs: secs,
            ehlo_secs: secs,
            starttls_secs: secs,
            mail_from_secs: secs,
            rcpt_to_secs: secs,
            data_secs: secs,
            quit_secs: secs,
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// Opportunistic TLS behaviour towards the exchanger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsPolicy {
    /// Upgrade via STARTTLS when the exchanger offers it (default: true)
    #[serde(default = "default_true")]
    pub opportunistic: bool,

    /// Skip certificate verification after STARTTLS (default: true)
    ///
    /// Exchangers belong to arbitrary recipients, so an untrusted
    /// certificate must not fail the delivery.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            opportunistic: true,
            accept_invalid_certs: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_port() -> u16 {
    25
}

/// Everything a delivery needs besides the message and a resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub sender: SenderIdentity,

    /// Name announced in EHLO/HELO (default: the sender's domain)
    #[serde(default)]
    pub helo_name: Option<String>,

    /// Port on the exchanger (default: 25)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tls: TlsPolicy,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    /// Try the next exchanger when one cannot be reached (default: false)
    #[serde(default)]
    pub mx_fallback: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            sender: SenderIdentity::default(),
            helo_name: None,
            port: default_port(),
            tls: TlsPolicy::default(),
            timeouts: SmtpTimeouts::default(),
            mx_fallback: false,
        }
    }
}

impl DeliveryConfig {
    #[must_use]
    pub fn helo_name(&self) -> &str {
        self.helo_name
            .as_deref()
            .or_else(|| self.sender.domain())
            .unwrap_or("localhost")
    }
}

/// Converts a configured number of seconds into a `Duration`.
pub(crate) const fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn message_requires_domain() {
        for recipient in ["alice", "alice@", "al ice@example.com"] {
            let err = OutboundMessage::new(recipient, "s", "<p/>", SenderIdentity::default());
            assert!(matches!(err, Err(DeliveryError::InvalidRecipient(_))), "{recipient}");
        }
    }

    #[test]
    fn message_rejects_multiline_subject() {
        let err = OutboundMessage::new(
            "alice@example.com",
            "Hi\r\nBcc: eve@example.com",
            "<p/>",
            SenderIdentity::default(),
        );
        assert!(matches!(err, Err(DeliveryError::InvalidMessage(_))));
    }

    #[test]
    fn message_renders_from_fixed_identity() {
        let message =
            OutboundMessage::new("alice@example.com", "Brief", "<p>Hi</p>", SenderIdentity::default())
                .unwrap();
        assert_eq!(message.domain(), "example.com");

        let rendered = message.render().unwrap();
        assert!(
            rendered
                .content
                .contains("From: \"Competitor Intel\" <intel@mxmail.localdomain>\r\n")
        );
        assert!(rendered.content.contains("Subject: Brief\r\n"));
        assert!(rendered.message_id.ends_with("@mxmail.localdomain>"));
    }

    #[test]
    fn defaults() {
        let config = DeliveryConfig::default();
        assert_eq!(config.port, 25);
        assert!(config.tls.opportunistic);
        assert!(config.tls.accept_invalid_certs);
        assert!(!config.mx_fallback);
        assert_eq!(config.helo_name(), "mxmail.localdomain");
        assert_eq!(config.timeouts.data_secs, 120);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: DeliveryConfig = ron::from_str("(port: 2525, tls: (opportunistic: false))").unwrap();
        assert_eq!(config.port, 2525);
        assert!(!config.tls.opportunistic);
        assert!(config.tls.accept_invalid_certs);
        assert_eq!(config.sender, SenderIdentity::default());
        assert_eq!(config.timeouts.connect_secs, 30);
    }
}
