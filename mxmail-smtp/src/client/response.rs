//! SMTP reply parsing and representation.

use std::fmt;

use super::error::{ClientError, Result};

/// A single line of an SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The SMTP status code (e.g., 220, 250, 550).
    pub code: u16,
    /// Whether this is the last line in a multi-line reply.
    pub is_last: bool,
    /// The text following the status code.
    pub message: String,
}

/// A complete SMTP reply, which may span multiple lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// All text lines in the reply, without their status codes.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// The final reply line as the server sent it, e.g. `250 2.0.0 Ok: queued`.
    #[must_use]
    pub fn final_line(&self) -> String {
        match self.lines.last() {
            Some(last) if !last.is_empty() => format!("{} {last}", self.code),
            _ => self.code.to_string(),
        }
    }

    /// Returns `true` for a 2xx reply.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns `true` for a 3xx reply (e.g. 354 after DATA).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    /// Returns `true` for a 4xx reply.
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns `true` for a 5xx reply.
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Returns `true` if any EHLO keyword line advertises `keyword`.
    #[must_use]
    pub fn advertises(&self, keyword: &str) -> bool {
        self.lines.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|first| first.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses a single reply line (without its line terminator).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line
            .get(..3)
            .ok_or_else(|| ClientError::ParseError(format!("Response line too short: '{line}'")))?;

        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(&c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(c)
                )));
            }
        };

        Ok(ResponseLine {
            code,
            is_last,
            message: line.get(4..).unwrap_or_default().to_string(),
        })
    }

    /// Parses a complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if the
    /// buffer does not yet hold a full reply. Lines may end in CRLF or a bare
    /// LF; bytes that are not valid UTF-8 are replaced rather than rejected,
    /// since we talk to arbitrary third-party servers.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the reply is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut consumed = 0;
        let mut lines = Vec::new();
        let mut first_code = None;

        while let Some(end) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(&String::from_utf8_lossy(raw))?;

            match first_code {
                Some(code) if code != parsed.code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(parsed.code),
            }

            lines.push(parsed.message);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" / "))
    }
}
