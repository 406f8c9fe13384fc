use std::path::Path;

use healthpost_core::config::{ClientConfig, ConfigError};
use healthpost_core::sync::{HttpSyncTransport, SyncClient, SyncSummary};

use crate::commands::common::{format_sync_summary, open_store};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let remote = ClientConfig::from_env()?.remote().map_err(|error| match error {
        ConfigError::MissingVar(_) => CliError::SyncNotConfigured,
        other => CliError::Config(other),
    })?;
    let transport = HttpSyncTransport::new(&remote)?;
    let client = SyncClient::new(open_store(db_path).await?, transport);

    let summary = client.flush().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in format_sync_summary(&summary) {
            println!("{line}");
        }
    }

    if let SyncSummary::Unreachable { reason, .. } = summary {
        return Err(CliError::SyncUnreachable(reason));
    }
    Ok(())
}
