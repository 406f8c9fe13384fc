use std::io;

use healthpost_core::config::ConfigError;
use healthpost_core::sync::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] healthpost_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("Invalid field `{0}`: expected KEY=VALUE")]
    InvalidField(String),
    #[error("Nothing to update: pass at least one field")]
    NothingToUpdate,
    #[error("Sync failed, will retry: {0}")]
    SyncUnreachable(String),
    #[error(
        "Sync is not configured. Set HEALTHPOST_API_URL and HEALTHPOST_TOKEN to enable `healthpost sync`."
    )]
    SyncNotConfigured,
}
