//! Wiring from configuration to a live channel.

use std::sync::Arc;

use anyhow::Context;
use tether_core::{Channel, FileStore, FixedSecret, KeyValueStore};
use tether_transport::{ProcessLink, RequestClient};

use crate::config::Config;

/// Spawn-on-demand channel to the configured companion.
///
/// The companion process starts with the first request. Must be called
/// inside a tokio runtime.
pub fn open_channel(config: &Config, secret: Option<String>) -> anyhow::Result<Channel> {
    let storage = config
        .storage_path()
        .context("No storage path configured and no data directory available")?;

    let link = ProcessLink::new(
        config.companion.command.clone(),
        config.companion.args.clone(),
    );
    let client = RequestClient::new(Arc::new(link), config.companion.framing.build());
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&storage));

    tracing::debug!(
        command = %config.companion.command,
        storage = %storage.display(),
        "Opening companion channel"
    );

    let channel = Channel::new(client, store, config.channel_config());
    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        channel.set_secret_provider(Arc::new(FixedSecret::new(secret)));
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_channel_is_lazy() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.companion.command = "/nonexistent/tether-companion".to_string();
        config.storage.path = Some(dir.path().join("state.json"));

        let channel = open_channel(&config, None).unwrap();
        assert!(!channel.is_paired().await.unwrap());
        assert_eq!(channel.transport_stats().connects, 0);
    }

    #[tokio::test]
    async fn test_missing_companion_reports_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.companion.command = "/nonexistent/tether-companion".to_string();
        config.storage.path = Some(dir.path().join("state.json"));

        let channel = open_channel(&config, Some("secret".into())).unwrap();
        let availability = channel.check_availability().await;
        assert!(!availability.available);
        assert!(availability.message.is_some());
    }
}
