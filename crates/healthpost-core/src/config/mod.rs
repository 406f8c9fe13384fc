//! Client configuration.
//!
//! Read from the environment by the CLI (and any other device front end) to
//! find the sync server and the credential to present to it.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where and how a device talks to the sync server.
///
/// The server settings are optional so that offline-only use needs no setup;
/// [`ClientConfig::remote`] enforces them when a flush is attempted.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub sync_timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_timeout", &self.sync_timeout)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
        }
    }
}

/// Server settings required to flush
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub api_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = normalize_text_option(lookup("HEALTHPOST_API_URL"));
        if let Some(url) = api_url.as_deref() {
            if !is_http_url(url) {
                return Err(ConfigError::Invalid(
                    "HEALTHPOST_API_URL must start with http:// or https://".to_string(),
                ));
            }
        }
        let api_url = api_url.map(|url| url.trim_end_matches('/').to_string());

        let token = normalize_text_option(lookup("HEALTHPOST_TOKEN"));

        let timeout_secs = match normalize_text_option(lookup("HEALTHPOST_SYNC_TIMEOUT_SECS")) {
            None => DEFAULT_SYNC_TIMEOUT_SECS,
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ConfigError::Invalid(
                    "HEALTHPOST_SYNC_TIMEOUT_SECS must be an integer in [1, 300]".to_string(),
                )
            })?,
        };
        if !(1..=300).contains(&timeout_secs) {
            return Err(ConfigError::Invalid(
                "HEALTHPOST_SYNC_TIMEOUT_SECS must be in [1, 300]".to_string(),
            ));
        }

        Ok(Self {
            api_url,
            token,
            sync_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Server URL and credential, or the first missing variable
    pub fn remote(&self) -> Result<RemoteConfig, ConfigError> {
        Ok(RemoteConfig {
            api_url: self
                .api_url
                .clone()
                .ok_or(ConfigError::MissingVar("HEALTHPOST_API_URL"))?,
            token: self
                .token
                .clone()
                .ok_or(ConfigError::MissingVar("HEALTHPOST_TOKEN"))?,
            timeout: self.sync_timeout,
        })
    }
}
