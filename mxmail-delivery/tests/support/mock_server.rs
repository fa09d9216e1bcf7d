//! Scripted SMTP exchanger for delivery tests
//!
//! Answers every command from a fixed table and records what it was sent.
//! It can be told to stall so that stage timeouts fire, or to complete
//! STARTTLS with a self-signed certificate.
#![allow(dead_code)] // Not every test uses every knob

use std::{
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};
use tokio_rustls::{TlsAcceptor, rustls::ServerConfig};

/// Command received by the mock exchanger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Raw message lines between DATA and the terminating dot
    MessageContent(String),
    StartTls,
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut reply = String::new();
        let last = self.lines.len().saturating_sub(1);

        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i == last { ' ' } else { '-' };
            let _ = write!(&mut reply, "{}{separator}{line}\r\n", self.code);
        }

        reply.into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    ehlo: Reply,
    helo: Reply,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    starttls: Reply,
    quit: Reply,
    /// Stop answering once this many commands have been read
    stall_on_command: Option<usize>,
    /// Handshake configuration used after a 220 reply to STARTTLS
    tls: Option<Arc<ServerConfig>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mx.test ESMTP ready"),
            ehlo: Reply {
                code: 250,
                lines: vec!["mx.test".to_string(), "8BITMIME".to_string()],
            },
            helo: Reply::new(250, "mx.test"),
            mail_from: Reply::new(250, "2.1.0 Ok"),
            rcpt_to: Reply::new(250, "2.1.5 Ok"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Ok: queued as 1A2B"),
            starttls: Reply::new(502, "5.5.1 Command not implemented"),
            quit: Reply::new(221, "2.0.0 Bye"),
            stall_on_command: None,
            tls: None,
        }
    }
}

/// A running mock exchanger bound to a random loopback port
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command received, across all connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Number of TCP connections accepted so far
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn serve(
        stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> std::io::Result<()> {
        let mut stream = BufReader::new(stream);
        let mut seen = 0;

        stream.write_all(&script.greeting.to_bytes()).await?;
        stream.flush().await?;
        if !(200..300).contains(&script.greeting.code) {
            return Ok(());
        }

        if Self::exchange(&mut stream, &script, &commands, &mut seen).await? != Outcome::StartTls {
            return Ok(());
        }
        let Some(tls) = &script.tls else {
            return Ok(());
        };

        let tls_stream = TlsAcceptor::from(Arc::clone(tls))
            .accept(stream.into_inner())
            .await?;
        let mut stream = BufReader::new(tls_stream);
        Self::exchange(&mut stream, &script, &commands, &mut seen).await?;

        Ok(())
    }

    /// Answers commands until the session ends or STARTTLS is accepted.
    async fn exchange<S>(
        stream: &mut S,
        script: &Script,
        commands: &RwLock<Vec<SmtpCommand>>,
        seen: &mut usize,
    ) -> std::io::Result<Outcome>
    where
        S: AsyncBufRead + AsyncWrite + Unpin,
    {
        let mut line = String::new();

        loop {
            if script.stall_on_command == Some(*seen) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Ok(Outcome::Closed);
            }

            line.clear();
            let Ok(read) = timeout(Duration::from_secs(10), stream.read_line(&mut line)).await
            else {
                return Ok(Outcome::Closed);
            };
            if read? == 0 {
                return Ok(Outcome::Closed);
            }
            *seen += 1;

            let command_line = line.trim_end();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));

            let (reply, command) = match verb.to_ascii_uppercase().as_str() {
                "EHLO" => (&script.ehlo, SmtpCommand::Ehlo(argument.to_string())),
                "HELO" => (&script.helo, SmtpCommand::Helo(argument.to_string())),
                "MAIL" => (&script.mail_from, SmtpCommand::MailFrom(argument.to_string())),
                "RCPT" => (&script.rcpt_to, SmtpCommand::RcptTo(argument.to_string())),
                "DATA" => (&script.data, SmtpCommand::Data),
                "STARTTLS" => (&script.starttls, SmtpCommand::StartTls),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    stream.write_all(&script.quit.to_bytes()).await?;
                    stream.flush().await?;
                    return Ok(Outcome::Closed);
                }
                _ => {
                    commands
                        .write()
                        .await
                        .push(SmtpCommand::Other(command_line.to_string()));
                    stream.write_all(b"500 5.5.2 Unknown command\r\n").await?;
                    stream.flush().await?;
                    continue;
                }
            };

            commands.write().await.push(command.clone());
            stream.write_all(&reply.to_bytes()).await?;
            stream.flush().await?;

            if command == SmtpCommand::StartTls && reply.code == 220 {
                return Ok(Outcome::StartTls);
            }

            if command == SmtpCommand::Data && reply.code == 354 {
                let mut content = String::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await? == 0 {
                        return Ok(Outcome::Closed);
                    }
                    if line == ".\r\n" || line == ".\n" {
                        break;
                    }
                    content.push_str(&line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                stream.write_all(&script.data_end.to_bytes()).await?;
                stream.flush().await?;
            }
        }
    }
}

/// How a stretch of the session ended
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Closed,
    StartTls,
}

/// Server configuration presenting the self-signed `mx.test` certificate
fn self_signed_tls_config() -> std::io::Result<Arc<ServerConfig>> {
    let certs = rustls_pemfile::certs(&mut &include_bytes!("certs/mx.test.crt")[..])
        .collect::<std::io::Result<Vec<_>>>()?;
    let key = rustls_pemfile::private_key(&mut &include_bytes!("certs/mx.test.key")[..])?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "No private key"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(Arc::new(config))
}

/// Builder for a `MockSmtpServer`
pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    /// Sets the EHLO reply; the first capability line is the server name.
    #[must_use]
    pub fn with_ehlo_response(mut self, code: u16, capabilities: &[&str]) -> Self {
        self.script.ehlo = Reply {
            code,
            lines: capabilities.iter().map(ToString::to_string).collect(),
        };
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_starttls_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.starttls = Reply::new(code, message);
        self
    }

    /// Advertises STARTTLS and completes the handshake with a self-signed
    /// certificate for `mx.test`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled certificate cannot be loaded.
    pub fn with_tls(mut self) -> std::io::Result<Self> {
        self.script.ehlo.lines.push("STARTTLS".to_string());
        self.script.starttls = Reply::new(220, "2.0.0 Ready to start TLS");
        self.script.tls = Some(self_signed_tls_config()?);
        Ok(self)
    }

    /// Hang instead of answering the command at `index` (0-based)
    #[must_use]
    pub const fn with_stall_on_command(mut self, index: usize) -> Self {
        self.script.stall_on_command = Some(index);
        self
    }

    /// Binds to a random loopback port and starts accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn build(self) -> std::io::Result<MockSmtpServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server = MockSmtpServer {
            addr,
            commands: Arc::clone(&commands),
            connections: Arc::clone(&connections),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(async move {
            while !shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                connections.fetch_add(1, Ordering::Relaxed);
                let script = Arc::clone(&script);
                let commands = Arc::clone(&commands);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::serve(stream, script, commands).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(server)
    }
}
