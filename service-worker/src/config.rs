use anyhow::{Context, Result};
use gas_sponsor_client::SponsorConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use wallet_extension_core::{KeepaliveConfig, StorageConfig, TransportConfig};

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sponsor: SponsorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// RPC endpoints per chain id, tried in order
    #[serde(default)]
    pub endpoints: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-endpoint timeout for status queries
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

impl ConfigFile {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config = Self::parse(&content)?;

        tracing::info!(
            "Loaded service worker config: {} chain(s), sponsorship {}",
            config.endpoints.len(),
            if config.sponsor.enabled { "on" } else { "off" }
        );

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ConfigFile = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keepalive.interval_secs == 0 {
            anyhow::bail!("keepalive.interval_secs must be greater than 0");
        }

        if self.transport.timeout_secs == 0 {
            anyhow::bail!("transport.timeout_secs must be greater than 0");
        }

        if self.watcher.poll_interval_secs == 0 {
            anyhow::bail!("watcher.poll_interval_secs must be greater than 0");
        }

        if self.sponsor.enabled && self.sponsor.base_url.trim().is_empty() {
            anyhow::bail!("sponsor.base_url is required when sponsorship is enabled");
        }

        for (chain, urls) in &self.endpoints {
            if urls.is_empty() {
                anyhow::bail!("No RPC endpoints configured for chain {}", chain);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config = ConfigFile::parse(
            r#"
            [transport]
            timeout_secs = 20
            origin_filter = "https://*/*"

            [keepalive]
            interval_secs = 10

            [storage]
            path = "./data/extension-storage.json"

            [sponsor]
            enabled = true
            base_url = "https://gas.example.org"
            gas_budget = 1000

            [endpoints]
            "sui:mainnet" = ["https://rpc-a", "https://rpc-b"]
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.timeout(), Duration::from_secs(20));
        assert_eq!(config.sponsor.effective_gas_budget(), 5_000_000_000);
        assert_eq!(config.endpoints["sui:mainnet"].len(), 2);
        assert_eq!(config.watcher.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ConfigFile::parse("").unwrap();
        assert!(!config.sponsor.enabled);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_validation_errors() {
        assert!(ConfigFile::parse("[keepalive]\ninterval_secs = 0").is_err());
        assert!(ConfigFile::parse("[sponsor]\nenabled = true").is_err());
        assert!(ConfigFile::parse("[endpoints]\n\"sui:testnet\" = []").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::load("/nonexistent/service-worker.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
