//! SMTP client used for direct delivery to a recipient's mail exchanger.
//!
//! - Plain TCP connections upgraded via STARTTLS when offered
//! - Certificate verification that can be relaxed explicitly
//! - Multi-line response parsing
//! - HTML message rendering with the headers a receiving MTA expects
//!
//! # Examples
//!
//! ```no_run
//! use std::net::SocketAddr;
//!
//! use mxmail_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr: SocketAddr = "192.0.2.10:25".parse()?;
//! let mut client = SmtpClient::connect(&[addr], "mx.example.com".to_string())
//!     .await?
//!     .accept_invalid_certs(true);
//!
//! client.read_greeting().await?;
//! client.ehlo("sender.example.org").await?;
//! client.mail_from("digest@sender.example.org").await?;
//! client.rcpt_to("alice@example.com").await?;
//! client.data().await?;
//!
//! let message = MessageBuilder::new()
//!     .from("Digest", "digest@sender.example.org")
//!     .to("alice@example.com")
//!     .subject("Weekly report")
//!     .html_body("<p>Hello</p>")
//!     .build()?;
//! let accepted = client.send_data(&message.content).await?;
//! assert!(accepted.is_success());
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{MessageBuilder, RenderedMessage};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
