//! Send a single HTML email directly to the recipient's mail exchanger.
//!
//! No relay and no queue: the recipient domain's MX records are resolved,
//! the preferred exchanger is contacted on port 25, and the outcome of that
//! one SMTP session is the outcome of the run.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mxmail_common::internal;
use mxmail_delivery::{DnsResolver, Mailer, Resolve};

pub use config::{CONFIG_ENV, Config, DEFAULT_CONFIG_PATHS, find_config_file};

/// Send one HTML email straight to the recipient's mail exchanger
#[derive(Parser, Debug)]
#[command(name = "mxmail")]
#[command(about = "Send one HTML email straight to the recipient's mail exchanger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Recipient address, e.g. alice@example.com
    pub recipient: String,

    /// Subject line
    pub subject: String,

    /// File holding the HTML body
    pub html_file: PathBuf,

    /// Configuration file, taking precedence over the environment and default locations
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the rendered message instead of sending it
    #[arg(long)]
    pub dry_run: bool,
}

/// Runs one invocation and returns what should be printed on stdout.
///
/// # Errors
///
/// Returns an error if the configuration or body cannot be read, or if the
/// delivery fails.
pub async fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = Config::load(cli.config.as_deref())?;

    if cli.dry_run {
        return dry_run(cli, &config).await;
    }

    let resolver = DnsResolver::new(&config.dns).context("Failed to initialise DNS resolver")?;
    run_with(cli, config, resolver).await
}

/// Like [`run`], with an already loaded configuration and a caller supplied
/// resolver.
///
/// # Errors
///
/// Returns an error if the body cannot be read or the delivery fails.
pub async fn run_with<R: Resolve>(cli: &Cli, config: Config, resolver: R) -> anyhow::Result<String> {
    let html_body = read_body(cli).await?;
    let mailer = Mailer::new(resolver, config.delivery);
    let message = mailer.compose(&cli.recipient, &cli.subject, &html_body)?;

    internal!(
        level = INFO,
        "Sending \"{}\" to {}",
        message.subject(),
        message.recipient()
    );
    let receipt = mailer.send(&message).await?;

    Ok(format!(
        "Delivered {} to {} via {}: {}",
        receipt.message_id,
        message.recipient(),
        receipt.host,
        receipt.response
    ))
}

async fn dry_run(cli: &Cli, config: &Config) -> anyhow::Result<String> {
    let html_body = read_body(cli).await?;
    let message = mxmail_delivery::OutboundMessage::new(
        cli.recipient.as_str(),
        cli.subject.as_str(),
        html_body,
        config.delivery.sender.clone(),
    )?;

    internal!(level = INFO, "Dry run, not contacting {}", message.domain());
    Ok(message.render()?.content)
}

async fn read_body(cli: &Cli) -> anyhow::Result<String> {
    tokio::fs::read_to_string(&cli.html_file)
        .await
        .with_context(|| format!("Failed to read HTML body from {}", cli.html_file.display()))
}
