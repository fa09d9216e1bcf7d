//! SMTP transaction execution against one mail exchanger.
//!
//! Runs the full exchange for a single message:
//! - connection and greeting
//! - EHLO (HELO if EHLO is refused)
//! - opportunistic STARTTLS, reconnecting in plaintext if it fails
//! - MAIL FROM, RCPT TO, DATA and the message content
//! - QUIT

use std::{future::Future, net::SocketAddr};

use mxmail_smtp::client::{ClientError, RenderedMessage, Response, SmtpClient};
use tracing::{debug, info, warn};

use crate::{
    DeliveryConfig, DeliveryState, OutboundMessage,
    error::{DeliveryError, SmtpStage},
    types::secs,
};

/// Outcome of TLS negotiation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsNegotiationOutcome {
    /// TLS was successfully negotiated via STARTTLS
    Success,
    /// TLS was not attempted
    Skipped,
    /// STARTTLS failed; reconnect and continue without it (RFC 3207 section 4.1)
    RetryWithoutTls,
}

/// Bounds `operation` by `limit_secs`, mapping expiry to a transport failure.
async fn bounded<T, F>(limit_secs: u64, what: &str, operation: F) -> Result<T, DeliveryError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    let limit = secs(limit_secs);
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| DeliveryError::TransportFailure(format!("{what} timed out after {limit:?}")))?
        .map_err(DeliveryError::from)
}

/// Fails with `SubmissionRejected` unless the reply is 2xx.
fn expect_success(stage: SmtpStage, response: Response) -> Result<Response, DeliveryError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(DeliveryError::rejected(stage, &response))
    }
}

/// A single SMTP transaction delivering one message to one exchanger.
pub struct SmtpTransaction<'a> {
    message: &'a OutboundMessage,
    rendered: &'a RenderedMessage,
    /// Exchanger hostname, for SNI and logging
    host: &'a str,
    /// IPv4 socket addresses of the exchanger
    addrs: Vec<SocketAddr>,
    config: &'a DeliveryConfig,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        message: &'a OutboundMessage,
        rendered: &'a RenderedMessage,
        host: &'a str,
        addrs: Vec<SocketAddr>,
        config: &'a DeliveryConfig,
    ) -> Self {
        Self {
            message,
            rendered,
            host,
            addrs,
            config,
        }
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient, DeliveryError> {
        let timeouts = &self.config.timeouts;

        let limit = secs(timeouts.connect_secs);
        let mut client = tokio::time::timeout(
            limit,
            SmtpClient::connect(&self.addrs, self.host.to_string()),
        )
        .await
        .map_err(|_| {
            DeliveryError::TransportFailure(format!(
                "Connecting to {} timed out after {limit:?}",
                self.host
            ))
        })?
        .map_err(|e| {
            DeliveryError::TransportFailure(format!("Failed to connect to {}: {e}", self.host))
        })?
        .accept_invalid_certs(self.config.tls.accept_invalid_certs);

        let greeting = bounded(timeouts.connect_secs, "Greeting", client.read_greeting()).await?;
        expect_success(SmtpStage::Greeting, greeting)?;
        debug!(state = %DeliveryState::Connected, server = %self.host);

        Ok(client)
    }

    /// EHLO, falling back to HELO for servers that refuse it.
    async fn greet(&self, client: &mut SmtpClient) -> Result<Response, DeliveryError> {
        let helo_name = self.config.helo_name();
        let limit = self.config.timeouts.ehlo_secs;

        let ehlo = bounded(limit, "EHLO", client.ehlo(helo_name)).await?;
        if !ehlo.is_permanent_error() {
            return expect_success(SmtpStage::Ehlo, ehlo);
        }

        debug!(server = %self.host, "EHLO refused, falling back to HELO");
        let helo = bounded(limit, "HELO", client.helo(helo_name)).await?;
        expect_success(SmtpStage::Ehlo, helo)
    }

    /// Runs the exchange and returns the exchanger's reply to the message.
    ///
    /// # Errors
    ///
    /// Returns `TransportFailure` for connection problems and timeouts, and
    /// `SubmissionRejected` for any refusal by the exchanger.
    pub async fn execute(self) -> Result<Response, DeliveryError> {
        let mut client = self.connect_and_greet().await?;
        let ehlo = self.greet(&mut client).await?;

        if self.negotiate_tls(&mut client, &ehlo).await? == TlsNegotiationOutcome::RetryWithoutTls
        {
            info!(
                server = %self.host,
                "Reconnecting without STARTTLS per RFC 3207 Section 4.1"
            );
            drop(client);
            client = self.connect_and_greet().await?;
            self.greet(&mut client).await?;
        }

        self.send_envelope(&mut client).await?;
        let accepted = self.send_message_data(&mut client).await?;

        // The message is already accepted; a failed QUIT changes nothing.
        if let Err(e) = bounded(self.config.timeouts.quit_secs, "QUIT", client.quit()).await {
            warn!(server = %self.host, "QUIT failed after successful delivery: {e}");
        }

        Ok(accepted)
    }

    async fn negotiate_tls(
        &self,
        client: &mut SmtpClient,
        ehlo: &Response,
    ) -> Result<TlsNegotiationOutcome, DeliveryError> {
        if !self.config.tls.opportunistic || !ehlo.advertises("STARTTLS") {
            return Ok(TlsNegotiationOutcome::Skipped);
        }

        if self.config.tls.accept_invalid_certs {
            debug!(server = %self.host, "Certificate verification disabled for STARTTLS");
        }

        let starttls = bounded(self.config.timeouts.starttls_secs, "STARTTLS", client.starttls()).await;
        match starttls {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                info!(
                    server = %self.host,
                    response = %response,
                    "Server rejected STARTTLS, continuing without TLS"
                );
                return Ok(TlsNegotiationOutcome::RetryWithoutTls);
            }
            Err(e) => {
                info!(server = %self.host, error = %e, "STARTTLS failed, continuing without TLS");
                return Ok(TlsNegotiationOutcome::RetryWithoutTls);
            }
        }

        // Capabilities must be re-learned after the upgrade (RFC 3207).
        self.greet(client).await?;
        debug!(server = %self.host, "TLS negotiated via STARTTLS");
        Ok(TlsNegotiationOutcome::Success)
    }

    async fn send_envelope(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let timeouts = &self.config.timeouts;

        let mail = bounded(
            timeouts.mail_from_secs,
            "MAIL FROM",
            client.mail_from(&self.message.sender().address),
        )
        .await?;
        expect_success(SmtpStage::MailFrom, mail)?;

        let rcpt = bounded(
            timeouts.rcpt_to_secs,
            "RCPT TO",
            client.rcpt_to(self.message.recipient()),
        )
        .await?;
        expect_success(SmtpStage::RcptTo, rcpt)?;

        Ok(())
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<Response, DeliveryError> {
        let limit = self.config.timeouts.data_secs;

        let data = bounded(limit, "DATA", client.data()).await?;
        if !data.is_intermediate() {
            return Err(DeliveryError::rejected(SmtpStage::Data, &data));
        }

        let accepted = bounded(
            limit,
            "Sending message data",
            client.send_data(&self.rendered.content),
        )
        .await?;
        expect_success(SmtpStage::DataEnd, accepted)
    }
}
