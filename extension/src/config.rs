// Extension runtime settings
// Sections shared by every host embedding the extension core; each field has
// a default so a partial TOML table is enough.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::keepalive::DEFAULT_INTERVAL;
use crate::transport::DEFAULT_TIMEOUT;

pub const DEFAULT_ORIGIN_FILTER: &str = "*://*/*";

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Per-message response timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// URL pattern selecting tabs for content broadcasts
    #[serde(default = "default_origin_filter")]
    pub origin_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file backing the extension store
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl KeepaliveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            origin_filter: default_origin_filter(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_origin_filter() -> String {
    DEFAULT_ORIGIN_FILTER.to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL.as_secs()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/extension-store.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sections {
        #[serde(default)]
        transport: TransportConfig,
        #[serde(default)]
        keepalive: KeepaliveConfig,
        #[serde(default)]
        storage: StorageConfig,
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let sections: Sections = toml::from_str("").unwrap();

        assert_eq!(sections.transport.timeout(), Duration::from_secs(30));
        assert_eq!(sections.transport.origin_filter, "*://*/*");
        assert_eq!(sections.keepalive.interval(), Duration::from_secs(10));
        assert_eq!(sections.storage.path, PathBuf::from("data/extension-store.json"));
    }

    #[test]
    fn test_partial_tables_keep_other_defaults() {
        let sections: Sections = toml::from_str(
            r#"
            [transport]
            origin_filter = "https://*.example/*"

            [keepalive]
            interval_secs = 3
            "#,
        )
        .unwrap();

        assert_eq!(sections.transport.timeout_secs, 30);
        assert_eq!(sections.transport.origin_filter, "https://*.example/*");
        assert_eq!(sections.keepalive.interval(), Duration::from_secs(3));
    }
}
