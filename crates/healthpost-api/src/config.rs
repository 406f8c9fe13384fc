use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use healthpost_core::apply::BatchPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub auth_clock_skew: Duration,
    pub bulk_patient_mutations: bool,
    pub max_batch_size: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("bulk_patient_mutations", &self.bulk_patient_mutations)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "HEALTHPOST_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "HEALTHPOST_DB_PATH",
            "healthpost-server.db",
        ));

        let jwt_secret = required_trimmed(&lookup, "HEALTHPOST_JWT_SECRET")?;
        if jwt_secret.len() < 16 {
            return Err(ConfigError::Invalid(
                "HEALTHPOST_JWT_SECRET must be at least 16 characters".to_string(),
            ));
        }

        let auth_clock_skew_secs =
            value_or_default(&lookup, "HEALTHPOST_AUTH_CLOCK_SKEW_SECS", "60")
                .parse::<u64>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "HEALTHPOST_AUTH_CLOCK_SKEW_SECS must be an integer in [0, 300]"
                            .to_string(),
                    )
                })?;
        if auth_clock_skew_secs > 300 {
            return Err(ConfigError::Invalid(
                "HEALTHPOST_AUTH_CLOCK_SKEW_SECS must be in [0, 300]".to_string(),
            ));
        }

        let bulk_patient_mutations =
            match value_or_default(&lookup, "HEALTHPOST_BULK_PATIENT_MUTATIONS", "true")
                .to_ascii_lowercase()
                .as_str()
            {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "HEALTHPOST_BULK_PATIENT_MUTATIONS must be true or false".to_string(),
                    ))
                }
            };

        let max_batch_size = value_or_default(&lookup, "HEALTHPOST_MAX_BATCH_SIZE", "500")
            .parse::<usize>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "HEALTHPOST_MAX_BATCH_SIZE must be an integer in [1, 5000]".to_string(),
                )
            })?;
        if !(1..=5_000).contains(&max_batch_size) {
            return Err(ConfigError::Invalid(
                "HEALTHPOST_MAX_BATCH_SIZE must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            jwt_secret,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            bulk_patient_mutations,
            max_batch_size,
        })
    }

    pub const fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            bulk_patient_mutations: self.bulk_patient_mutations,
            max_batch_size: self.max_batch_size,
        }
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    const SECRET: (&str, &str) = ("HEALTHPOST_JWT_SECRET", "sensitive-signing-secret");

    #[test]
    fn config_requires_jwt_secret() {
        let err = config_from(&[]).unwrap_err();
        assert!(err.to_string().contains("HEALTHPOST_JWT_SECRET"));

        let err = config_from(&[("HEALTHPOST_JWT_SECRET", "short")]).unwrap_err();
        assert!(err.to_string().contains("16 characters"));
    }

    #[test]
    fn config_defaults() {
        let config = config_from(&[SECRET]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("healthpost-server.db"));
        assert!(config.bulk_patient_mutations);
        assert_eq!(config.batch_policy(), BatchPolicy::default());
    }

    #[test]
    fn config_validates_batch_settings() {
        assert!(config_from(&[SECRET, ("HEALTHPOST_MAX_BATCH_SIZE", "0")]).is_err());
        assert!(config_from(&[SECRET, ("HEALTHPOST_MAX_BATCH_SIZE", "5001")]).is_err());
        assert!(config_from(&[SECRET, ("HEALTHPOST_BULK_PATIENT_MUTATIONS", "maybe")]).is_err());

        let config = config_from(&[
            SECRET,
            ("HEALTHPOST_MAX_BATCH_SIZE", "50"),
            ("HEALTHPOST_BULK_PATIENT_MUTATIONS", "false"),
        ])
        .unwrap();
        assert_eq!(config.max_batch_size, 50);
        assert!(!config.bulk_patient_mutations);
    }

    #[test]
    fn config_redacts_sensitive_debug_fields() {
        let config = config_from(&[SECRET]).unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("sensitive-signing-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
