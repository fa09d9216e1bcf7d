//! Mail exchange resolution for direct delivery.
//!
//! The recipient domain's MX answer is reduced to a list of
//! [`MailExchange`]s sorted by ascending priority, with hostnames stripped
//! of their trailing root dot. Exchanger hosts are then resolved to IPv4
//! addresses only, since many exchangers reject mail arriving over IPv6 from
//! hosts without matching reverse DNS.
//!
//! Resolution goes through the [`Resolve`] trait so delivery can run against
//! a stub in tests; [`DnsResolver`] is the production implementation backed
//! by the system resolver configuration.

use std::{collections::HashMap, net::Ipv4Addr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    ResolveError, TokioResolver,
    config::{LookupIpStrategy, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::DeliveryError;

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] ResolveError),

    /// DNS query did not complete within the configured bound.
    #[error("DNS query timed out for: {0}")]
    Timeout(String),
}

/// Configuration for DNS resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Bound on each DNS query in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Static MX answers keyed by domain, in `"<priority> <host>"` form.
    ///
    /// ```ron
    /// mx_overrides: {
    ///     "test.example.com": ["10 127.0.0.1"],
    /// },
    /// ```
    #[serde(default)]
    pub mx_overrides: HashMap<String, Vec<String>>,
}

const fn default_timeout_secs() -> u64 {
    5
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            mx_overrides: HashMap::new(),
        }
    }
}

impl DnsConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// A mail exchanger for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailExchange {
    /// MX preference (lower value = higher precedence).
    pub priority: u16,
    /// Exchanger hostname, without a trailing dot.
    pub host: String,
}

impl MailExchange {
    /// Creates an entry, normalising away a trailing root dot.
    #[must_use]
    pub fn new(priority: u16, host: impl AsRef<str>) -> Self {
        let host = host.as_ref();
        Self {
            priority,
            host: host.strip_suffix('.').unwrap_or(host).to_string(),
        }
    }
}

/// Parses one raw answer line of the form `<priority> <host>`.
///
/// Lines without exactly two whitespace-separated fields, or whose priority
/// is not a 16-bit number, yield `None`.
#[must_use]
pub fn parse_mx_line(line: &str) -> Option<MailExchange> {
    let mut fields = line.split_whitespace();
    let (Some(priority), Some(host), None) = (fields.next(), fields.next(), fields.next()) else {
        return None;
    };

    let priority = priority.parse().ok()?;
    let exchange = MailExchange::new(priority, host);
    (!exchange.host.is_empty()).then_some(exchange)
}

/// Parses a raw MX answer, silently dropping malformed lines, and sorts the
/// result by ascending priority. Equal priorities keep answer order.
#[must_use]
pub fn parse_mx_answer<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<MailExchange> {
    let mut exchanges: Vec<MailExchange> = lines.into_iter().filter_map(parse_mx_line).collect();
    exchanges.sort_by_key(|mx| mx.priority);
    exchanges
}

/// Extracts the domain part of a recipient: everything after the first `@`.
#[must_use]
pub fn recipient_domain(address: &str) -> Option<&str> {
    address
        .split_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty())
}

/// Source of MX answers and exchanger addresses.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Returns the mail exchangers for `domain`, in any order.
    ///
    /// A domain without MX records yields an empty list rather than an error.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if the lookup itself fails.
    async fn mail_exchanges(&self, domain: &str) -> Result<Vec<MailExchange>, DnsError>;

    /// Returns the IPv4 addresses of an exchanger host.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` if the lookup itself fails.
    async fn ipv4_addresses(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
}

/// Resolves `domain` to its exchangers, sorted by ascending priority.
///
/// # Errors
///
/// Returns `DeliveryError::NoMailExchangeFound` when the domain has no MX
/// records, or `DeliveryError::Dns` when the lookup fails.
pub async fn resolve_mail_exchanges<R>(
    resolver: &R,
    domain: &str,
) -> Result<Vec<MailExchange>, DeliveryError>
where
    R: Resolve + ?Sized,
{
    let mut exchanges = resolver.mail_exchanges(domain).await?;
    // A null MX (RFC 7505) leaves an empty host behind.
    exchanges.retain(|mx| !mx.host.is_empty());
    if exchanges.is_empty() {
        return Err(DeliveryError::NoMailExchangeFound(domain.to_string()));
    }

    exchanges.sort_by_key(|mx| mx.priority);
    debug!(
        "Resolved {} mail exchange(s) for {domain}, preferred {} (priority {})",
        exchanges.len(),
        exchanges[0].host,
        exchanges[0].priority
    );
    Ok(exchanges)
}

/// DNS resolver backed by the system configuration.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    overrides: HashMap<String, Vec<MailExchange>>,
    timeout: Duration,
}

impl DnsResolver {
    /// Creates a resolver from the system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(Self::options(config))
            .build();

        Ok(Self::from_parts(resolver, config))
    }

    /// Creates a resolver that queries the given name servers instead of the
    /// system configuration.
    #[must_use]
    pub fn with_resolver_config(resolver_config: ResolverConfig, config: &DnsConfig) -> Self {
        let resolver =
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(Self::options(config))
                .build();

        Self::from_parts(resolver, config)
    }

    fn options(config: &DnsConfig) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = config.timeout();
        opts.ip_strategy = LookupIpStrategy::Ipv4Only;
        opts
    }

    fn from_parts(resolver: TokioResolver, config: &DnsConfig) -> Self {
        let overrides = config
            .mx_overrides
            .iter()
            .map(|(domain, answer)| {
                (
                    domain.to_ascii_lowercase(),
                    parse_mx_answer(answer.iter().map(String::as_str)),
                )
            })
            .collect();

        Self {
            resolver,
            overrides,
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn mail_exchanges(&self, domain: &str) -> Result<Vec<MailExchange>, DnsError> {
        if let Some(exchanges) = self.overrides.get(&domain.to_ascii_lowercase()) {
            debug!("Using configured MX override for {domain}");
            return Ok(exchanges.clone());
        }

        debug!("Looking up MX records for {domain}");
        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(domain))
            .await
            .map_err(|_| DnsError::Timeout(domain.to_string()))?;

        match lookup {
            Ok(mx_lookup) => Ok(mx_lookup
                .iter()
                .filter(|mx| {
                    let null_mx = mx.exchange().is_root();
                    if null_mx {
                        debug!("{domain} publishes a null MX and accepts no mail");
                    }
                    !null_mx
                })
                .map(|mx| {
                    let exchange = MailExchange::new(mx.preference(), mx.exchange().to_utf8());
                    debug!(
                        "Found MX record: {} (priority: {})",
                        exchange.host, exchange.priority
                    );
                    exchange
                })
                .collect()),
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                debug!("No MX records for {domain}: {err}");
                Ok(Vec::new())
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }

    async fn ipv4_addresses(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.ipv4_lookup(host))
            .await
            .map_err(|_| DnsError::Timeout(host.to_string()))?;

        match lookup {
            Ok(ipv4) => Ok(ipv4.iter().map(|a| a.0).collect()),
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => Ok(Vec::new()),
            Err(err) => {
                warn!("A lookup failed for {host}: {err}");
                Err(DnsError::LookupFailed(err))
            }
        }
    }
}
