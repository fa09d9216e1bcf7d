//! Typed errors for a single delivery attempt.
//!
//! Every failure is terminal for the invocation. The variants only decide
//! what gets reported, and whether `mx_fallback` may move on to the next
//! exchanger (transport failures only).

use std::fmt;

use mxmail_smtp::client::{ClientError, Response};
use thiserror::Error;

use crate::DnsError;

/// Point in the SMTP exchange at which the remote server said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStage {
    Greeting,
    Ehlo,
    MailFrom,
    RcptTo,
    Data,
    DataEnd,
}

impl fmt::Display for SmtpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::DataEnd => "end of data",
        })
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient has no usable domain part.
    #[error("Invalid recipient address: {0}")]
    InvalidRecipient(String),

    /// The message could not be rendered (e.g. a line break in the subject).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The recipient domain publishes no mail exchangers.
    #[error("No mail exchange found for domain: {0}")]
    NoMailExchangeFound(String),

    /// The MX lookup itself failed.
    #[error(transparent)]
    Dns(#[from] DnsError),

    /// The exchanger could not be reached, the connection dropped, or a
    /// stage timed out.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The exchanger answered with a 4xx/5xx reply.
    #[error("Submission rejected at {stage}: {code} {message}")]
    SubmissionRejected {
        stage: SmtpStage,
        code: u16,
        message: String,
    },
}

impl DeliveryError {
    pub(crate) fn rejected(stage: SmtpStage, response: &Response) -> Self {
        Self::SubmissionRejected {
            stage,
            code: response.code,
            message: response.lines.join(" "),
        }
    }

    /// Returns `true` if the exchanger was never reached or the session broke
    /// off, as opposed to the exchanger refusing the message.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

impl From<ClientError> for DeliveryError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::BuilderError(message) => Self::InvalidMessage(message),
            other => Self::TransportFailure(other.to_string()),
        }
    }
}
