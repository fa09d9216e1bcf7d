use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::Context;
use mxmail_delivery::{DeliveryConfig, DnsConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MXMAIL_CONFIG";

/// Locations searched when neither `--config` nor `MXMAIL_CONFIG` is given.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] =
    ["./mxmail.config.ron", "/etc/mxmail/mxmail.config.ron"];

/// Everything read from `mxmail.config.ron`. Every field is optional.
///
/// ```ron
/// (
///     delivery: (
///         port: 2525,
///         mx_fallback: true,
///     ),
///     dns: (
///         mx_overrides: { "example.com": ["10 127.0.0.1"] },
///     ),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delivery: DeliveryConfig,
    pub dns: DnsConfig,
}

impl Config {
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_ron(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Loads the configuration file picked by [`find_config_file`], or the
    /// built-in defaults when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing, or if the
    /// chosen file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = find_config_file(explicit)? else {
            tracing::debug!("No configuration file found, using defaults");
            return Ok(Self::default());
        };

        tracing::debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `MXMAIL_CONFIG` environment variable
/// 3. ./mxmail.config.ron (current working directory)
/// 4. /etc/mxmail/mxmail.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if the path from 1. or 2. does not exist.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let defaults = DEFAULT_CONFIG_PATHS.map(PathBuf::from);
    select_config_file(explicit, std::env::var_os(CONFIG_ENV), &defaults)
}

fn select_config_file(
    explicit: Option<&Path>,
    from_env: Option<OsString>,
    defaults: &[PathBuf],
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    Ok(defaults.iter().find(|path| path.exists()).cloned())
}
