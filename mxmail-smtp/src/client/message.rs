//! Rendering of the single-part HTML message handed to the remote exchanger.

use std::fmt::Write;

use chrono::{DateTime, FixedOffset, Local};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// A fully rendered RFC 5322 message ready for the DATA phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// The `Message-ID` header value, angle brackets included.
    pub message_id: String,
    /// Headers and body with CRLF line endings.
    pub content: String,
}

/// Builder for the HTML report message.
///
/// ```no_run
/// use mxmail_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("Competitor Intel", "intel@example.org")
///     .to("alice@example.com")
///     .subject("Weekly brief")
///     .html_body("<h1>Brief</h1>")
///     .build()
///     .unwrap();
/// assert!(message.content.contains("Content-Type: text/html"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<(String, String)>,
    to: Option<String>,
    subject: Option<String>,
    html_body: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From header from a display name and an address.
    #[must_use]
    pub fn from(mut self, display_name: impl Into<String>, address: impl Into<String>) -> Self {
        self.from = Some((display_name.into(), address.into()));
        self
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn html_body(mut self, content: impl Into<String>) -> Self {
        self.html_body = Some(content.into());
        self
    }

    /// Pins the Date header instead of using the local clock.
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Pins the Message-ID instead of generating one.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Renders the message.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` if the sender or recipient is
    /// missing, or if a header value contains a line break.
    pub fn build(self) -> Result<RenderedMessage> {
        let (display_name, sender) = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Missing sender".to_string()))?;
        let to = self
            .to
            .ok_or_else(|| ClientError::BuilderError("Missing recipient".to_string()))?;
        let subject = self.subject.unwrap_or_default();

        for (name, value) in [
            ("From", display_name.as_str()),
            ("From", sender.as_str()),
            ("To", to.as_str()),
            ("Subject", subject.as_str()),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(ClientError::BuilderError(format!(
                    "{name} header must not contain line breaks"
                )));
            }
        }

        let message_id = self.message_id.unwrap_or_else(|| {
            let domain = sender
                .rsplit_once('@')
                .map_or("localhost", |(_, domain)| domain);
            format!("<{}@{domain}>", Ulid::new())
        });
        let date = self
            .date
            .unwrap_or_else(|| Local::now().fixed_offset())
            .to_rfc2822();

        let mut content = String::with_capacity(1024);
        // Writing into a String cannot fail.
        let _ = write!(content, "From: {} <{sender}>\r\n", display_name_phrase(&display_name));
        let _ = write!(content, "To: {to}\r\n");
        let _ = write!(content, "Subject: {}\r\n", encode_header_text(&subject));
        let _ = write!(content, "Date: {date}\r\n");
        let _ = write!(content, "Message-ID: {message_id}\r\n");
        content.push_str("MIME-Version: 1.0\r\n");
        content.push_str("Content-Type: text/html; charset=utf-8\r\n");
        content.push_str("Content-Transfer-Encoding: base64\r\n");
        content.push_str("\r\n");
        content.push_str(&encode_body(&self.html_body.unwrap_or_default()));

        Ok(RenderedMessage {
            message_id,
            content,
        })
    }
}

/// Quotes or encodes a display name for use in an address header.
fn display_name_phrase(name: &str) -> String {
    if !name.is_ascii() {
        return encode_header_text(name);
    }

    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// RFC 2047 `B` encoding for non-ASCII header text; ASCII passes through.
fn encode_header_text(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!("=?utf-8?B?{}?=", base64_encode(text.as_bytes()))
    }
}

/// Base64 of the body in canonical CRLF form, wrapped at 76 columns.
///
/// Keeps every line 7-bit and far below the 998 octet limit, whatever the
/// HTML looks like, so no 8BITMIME support is needed from the exchanger.
fn encode_body(html: &str) -> String {
    // 57 input octets encode to exactly 76 characters.
    const LINE_INPUT: usize = 57;

    let mut canonical = String::with_capacity(html.len() + 2);
    for line in html.lines() {
        canonical.push_str(line);
        canonical.push_str("\r\n");
    }

    let mut result = String::with_capacity(canonical.len().div_ceil(3) * 4 + canonical.len() / 28);
    for chunk in canonical.as_bytes().chunks(LINE_INPUT) {
        result.push_str(&base64_encode(chunk));
        result.push_str("\r\n");
    }

    result
}

/// Unwrapped base64, enough for encoded-words.
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut result = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);

        let b1 = usize::from(buf[0] >> 2);
        let b2 = usize::from(((buf[0] & 0x03) << 4) | (buf[1] >> 4));
        let b3 = usize::from(((buf[1] & 0x0F) << 2) | (buf[2] >> 6));
        let b4 = usize::from(buf[2] & 0x3F);

        result.push(char::from(ALPHABET[b1]));
        result.push(char::from(ALPHABET[b2]));
        result.push(if chunk.len() > 1 {
            char::from(ALPHABET[b3])
        } else {
            '='
        });
        result.push(if chunk.len() > 2 {
            char::from(ALPHABET[b4])
        } else {
            '='
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fixed_date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc2822("Tue, 13 Oct 2026 09:30:00 +0000").unwrap()
    }

    fn report() -> MessageBuilder {
        MessageBuilder::new()
            .from("Competitor Intel", "intel@sender.example")
            .to("alice@example.com")
            .subject("Weekly brief")
            .html_body("<h1>Brief</h1>\n<p>Body</p>")
            .date(fixed_date())
            .message_id("<fixed@sender.example>")
    }

    #[test]
    fn renders_headers_and_body() {
        let message = report().build().unwrap();

        assert_eq!(
            message.content,
            "From: \"Competitor Intel\" <intel@sender.example>\r\n\
             To: alice@example.com\r\n\
             Subject: Weekly brief\r\n\
             Date: Tue, 13 Oct 2026 09:30:00 +0000\r\n\
             Message-ID: <fixed@sender.example>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             PGgxPkJyaWVmPC9oMT4NCjxwPkJvZHk8L3A+DQo=\r\n"
        );
        assert_eq!(message.message_id, "<fixed@sender.example>");
    }

    #[test]
    fn generated_message_id_uses_sender_domain() {
        let message = MessageBuilder::new()
            .from("Intel", "intel@sender.example")
            .to("alice@example.com")
            .build()
            .unwrap();

        assert!(message.message_id.starts_with('<'));
        assert!(message.message_id.ends_with("@sender.example>"));
        assert!(
            message
                .content
                .contains(&format!("Message-ID: {}\r\n", message.message_id))
        );
    }

    #[test]
    fn line_breaks_in_headers_are_rejected() {
        let err = report().subject("Hi\r\nBcc: eve@example.com").build();
        assert!(matches!(err, Err(ClientError::BuilderError(_))));

        let err = report().to("alice@example.com\nX: y").build();
        assert!(matches!(err, Err(ClientError::BuilderError(_))));
    }

    #[test]
    fn missing_recipient_is_rejected() {
        let err = MessageBuilder::new().from("Intel", "intel@sender.example").build();
        assert!(matches!(err, Err(ClientError::BuilderError(_))));
    }

    #[test]
    fn non_ascii_subject_is_encoded() {
        let message = report().subject("Café").build().unwrap();
        assert!(message.content.contains("Subject: =?utf-8?B?Q2Fmw6k=?=\r\n"));
    }

    #[test]
    fn display_name_quotes_are_escaped() {
        let message = report().from("The \"Intel\" Desk", "intel@sender.example").build().unwrap();
        assert!(
            message
                .content
                .contains("From: \"The \\\"Intel\\\" Desk\" <intel@sender.example>\r\n")
        );
    }

    #[test]
    fn long_single_line_body_stays_within_line_limit() {
        let html = format!("<table>{}</table>", "<tr><td>Résumé ✅</td></tr>".repeat(200));
        let message = report().html_body(html.as_str()).build().unwrap();

        let (_, body) = message.content.split_once("\r\n\r\n").unwrap();
        assert!(message.content.is_ascii());
        assert!(message.content.split("\r\n").all(|line| line.len() <= 998));
        assert!(body.split("\r\n").all(|line| line.len() <= 76));

        let lines: Vec<&str> = body.trim_end_matches("\r\n").split("\r\n").collect();
        assert!(lines.len() > 1);
        assert!(lines[..lines.len() - 1].iter().all(|line| line.len() == 76));
    }

    #[test]
    fn body_is_encoded_with_crlf_line_endings() {
        assert_eq!(encode_body("a\nb"), format!("{}\r\n", base64_encode(b"a\r\nb\r\n")));
        assert_eq!(encode_body(""), "");
    }

    #[test]
    fn base64_matches_known_vectors() {
        assert_eq!(base64_encode(b"Hello World"), "SGVsbG8gV29ybGQ=");
        assert_eq!(base64_encode(b"ab"), "YWI=");
        assert_eq!(base64_encode(b"abc"), "YWJj");
    }
}
