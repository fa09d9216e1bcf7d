use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, warn};

use crate::{
    DeliveryConfig, DeliveryError, DeliveryReceipt, DeliveryState, OutboundMessage,
    dns::{MailExchange, Resolve, resolve_mail_exchanges},
    smtp_transaction::SmtpTransaction,
};

/// Sends one message straight to the recipient's preferred mail exchanger.
///
/// ```no_run
/// use mxmail_delivery::{DeliveryConfig, DnsConfig, DnsResolver, Mailer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let resolver = DnsResolver::new(&DnsConfig::default())?;
/// let mailer = Mailer::new(resolver, DeliveryConfig::default());
///
/// let message = mailer.compose("alice@example.com", "Weekly brief", "<p>Hi</p>")?;
/// let receipt = mailer.send(&message).await?;
/// println!("{receipt}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Mailer<R> {
    resolver: R,
    config: DeliveryConfig,
}

impl<R: Resolve> Mailer<R> {
    #[must_use]
    pub const fn new(resolver: R, config: DeliveryConfig) -> Self {
        Self { resolver, config }
    }

    /// Builds a message from the configured sender identity.
    ///
    /// # Errors
    ///
    /// See [`OutboundMessage::new`].
    pub fn compose(
        &self,
        recipient: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<OutboundMessage, DeliveryError> {
        OutboundMessage::new(recipient, subject, html_body, self.config.sender.clone())
    }

    /// Resolves, connects and submits.
    ///
    /// Only the preferred exchanger is tried unless `mx_fallback` is set, in
    /// which case transport failures move on to the next one. Rejections are
    /// always final.
    ///
    /// # Errors
    ///
    /// Returns the single `DeliveryError` that ended the attempt.
    pub async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let result = self.run(message).await;

        match &result {
            Ok(receipt) => info!(state = %DeliveryState::Done, "Delivered {receipt}"),
            Err(e) => warn!(
                state = %DeliveryState::Failed,
                "Delivery to {} failed: {e}",
                message.recipient()
            ),
        }

        result
    }

    async fn run(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        debug!(state = %DeliveryState::Start, recipient = message.recipient());

        let domain = message.domain();
        debug!(state = %DeliveryState::DomainExtracted, domain);

        let exchanges = resolve_mail_exchanges(&self.resolver, domain).await?;
        debug!(state = %DeliveryState::MxResolved, domain, count = exchanges.len());

        let rendered = message.render()?;
        let candidates = if self.config.mx_fallback {
            &exchanges[..]
        } else {
            &exchanges[..1]
        };

        let mut outcome = Err(DeliveryError::NoMailExchangeFound(domain.to_string()));
        for exchange in candidates {
            outcome = self.deliver_to(exchange, message, &rendered).await;

            match &outcome {
                Err(e) if e.is_transport() && self.config.mx_fallback => {
                    warn!(server = %exchange.host, "{e}, trying next exchanger");
                }
                _ => break,
            }
        }

        outcome
    }

    async fn deliver_to(
        &self,
        exchange: &MailExchange,
        message: &OutboundMessage,
        rendered: &mxmail_smtp::client::RenderedMessage,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let addrs = self.exchanger_addrs(&exchange.host).await?;
        debug!(
            server = %exchange.host,
            priority = exchange.priority,
            ?addrs,
            "Contacting mail exchanger"
        );

        let accepted = SmtpTransaction::new(message, rendered, &exchange.host, addrs, &self.config)
            .execute()
            .await?;
        debug!(state = %DeliveryState::Submitted, server = %exchange.host);

        Ok(DeliveryReceipt {
            message_id: rendered.message_id.clone(),
            host: exchange.host.clone(),
            response: accepted.final_line(),
        })
    }

    /// IPv4 socket addresses for an exchanger; IP literals are used as is.
    async fn exchanger_addrs(&self, host: &str) -> Result<Vec<SocketAddr>, DeliveryError> {
        let port = self.config.port;

        if let Ok(ip) = host.parse::<IpAddr>() {
            return match ip {
                IpAddr::V4(v4) => Ok(vec![SocketAddr::from((v4, port))]),
                IpAddr::V6(_) => Err(DeliveryError::TransportFailure(format!(
                    "{host} is not an IPv4 address"
                ))),
            };
        }

        let addrs = self.resolver.ipv4_addresses(host).await.map_err(|e| {
            DeliveryError::TransportFailure(format!("Failed to resolve {host}: {e}"))
        })?;

        if addrs.is_empty() {
            return Err(DeliveryError::TransportFailure(format!(
                "No IPv4 address for {host}"
            )));
        }

        Ok(addrs
            .into_iter()
            .map(|ip| SocketAddr::from((ip, port)))
            .collect())
    }
}
