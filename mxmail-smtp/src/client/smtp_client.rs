//! SMTP client connection with opportunistic STARTTLS.

use std::{net::SocketAddr, sync::Arc};

use mxmail_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the read buffer for SMTP replies.
const BUFFER_SIZE: usize = 8192;

/// Upper bound on a single reply (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Either side of a STARTTLS upgrade.
enum ClientConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientConnection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn upgrade_to_tls(self, domain: &str, accept_invalid_certs: bool) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        };

        let config = if accept_invalid_certs {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            let mut root_store = RootCertStore::empty();
            let certs = rustls_native_certs::load_native_certs();
            let (added, ignored) = root_store.add_parsable_certificates(certs.certs);
            if !certs.errors.is_empty() || ignored > 0 {
                tracing::warn!(
                    errors = ?certs.errors,
                    added,
                    ignored,
                    "Some native certificates could not be loaded"
                );
            }

            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid domain: {e}")))?;

        let tls_stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        Ok(Self::Tls(Box::new(tls_stream)))
    }
}

/// Accepts any server certificate.
///
/// Remote exchangers belong to arbitrary recipients, so trust can only be
/// relaxed explicitly via `SmtpClient::accept_invalid_certs`.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// An SMTP client for sending commands and receiving replies.
pub struct SmtpClient {
    connection: Option<ClientConnection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    server_domain: String,
    accept_invalid_certs: bool,
}

impl SmtpClient {
    /// Connects to the first reachable address in `addrs`.
    ///
    /// `server_domain` is the exchanger's hostname, used for TLS SNI.
    ///
    /// # Errors
    ///
    /// Returns an error if no address accepts the connection.
    pub async fn connect(addrs: &[SocketAddr], server_domain: String) -> Result<Self> {
        let stream = TcpStream::connect(addrs).await?;
        tracing::debug!(peer = ?stream.peer_addr().ok(), server = %server_domain, "Connected");

        Ok(Self {
            connection: Some(ClientConnection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            server_domain,
            accept_invalid_certs: false,
        })
    }

    /// Sets whether to accept certificates that fail verification after
    /// STARTTLS. Defaults to `false`.
    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Reads the initial server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Sends a command line to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        outgoing!("{command}");

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(format!("{command}\r\n").as_bytes()).await?;
        connection.flush().await
    }

    /// Sends a command and reads its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn command(&mut self, command: &str) -> Result<Response> {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("EHLO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn helo(&mut self, domain: &str) -> Result<Response> {
        self.command(&format!("HELO {domain}")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Sends the message content, dot-stuffed, followed by the end-of-data
    /// marker, and reads the final reply.
    ///
    /// # Errors
    ///
    /// Returns an error if sending or reading fails.
    pub async fn send_data(&mut self, data: &str) -> Result<Response> {
        let payload = dot_stuff(data);
        outgoing!("<{} bytes of message data>", payload.len());

        let connection = self
            .connection
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?;
        connection.send(payload.as_bytes()).await?;
        connection.send(b".\r\n").await?;
        connection.flush().await?;

        self.read_response().await
    }

    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Sends STARTTLS and, on a 2xx reply, upgrades the connection.
    ///
    /// A rejected STARTTLS leaves the plain connection in place and returns
    /// the reply for the caller to inspect.
    ///
    /// # Errors
    ///
    /// Returns an error if the command or the TLS handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.command("STARTTLS").await?;

        if response.is_success() {
            let old_connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
            self.connection = Some(
                old_connection
                    .upgrade_to_tls(&self.server_domain, self.accept_invalid_certs)
                    .await?,
            );
            // Anything buffered before the handshake is plaintext the
            // server had no business sending.
            self.buffer_pos = 0;
        }

        Ok(response)
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;

                incoming!("{}", response);

                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(ClientError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Normalises line endings to CRLF and doubles any leading dot (RFC 5321
/// section 4.5.2). The result always ends in CRLF.
fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 64);

    for line in data.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}
