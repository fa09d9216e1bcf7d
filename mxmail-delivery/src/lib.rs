//! Direct delivery of a single message to the recipient's mail exchanger
//!
//! This crate provides functionality to:
//! - Extract the recipient domain and resolve its MX records
//! - Pick the preferred exchanger (lowest priority value)
//! - Run one SMTP session against it, with opportunistic STARTTLS
//! - Report the outcome as a receipt or a typed error

mod dns;
mod error;
mod mailer;
mod smtp_transaction;
mod types;

// Re-export DNS types
pub use dns::{
    DnsConfig, DnsError, DnsResolver, MailExchange, Resolve, parse_mx_answer, parse_mx_line,
    recipient_domain, resolve_mail_exchanges,
};
// Re-export error types
pub use error::{DeliveryError, SmtpStage};
// Re-export core types
pub use mailer::Mailer;
pub use smtp_transaction::SmtpTransaction;
pub use types::{
    DEFAULT_SENDER_ADDRESS, DEFAULT_SENDER_NAME, DeliveryConfig, DeliveryReceipt, DeliveryState,
    OutboundMessage, SenderIdentity, SmtpTimeouts, TlsPolicy,
};
