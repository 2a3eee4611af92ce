// Submitted-transaction tracking
// Records live in the extension store until a terminal status is observed
// or they age out.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::now_millis;
use crate::services::storage::{load, modify, KeyValueStore, StoreError};

pub const TRACKED_TXS_KEY: &str = "trackedTxs";
pub const MAX_RETRY_COUNT: u32 = 5;
pub const TX_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    #[default]
    Default,
    Staking,
    Nft,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTx {
    pub tx_hash: String,
    pub chain_id: String,
    pub address: String,
    /// Milliseconds since the Unix epoch
    pub added_at: u64,
    pub retry_count: u32,
    #[serde(default, rename = "type")]
    pub kind: TxKind,
}

impl TrackedTx {
    pub fn new(
        tx_hash: impl Into<String>,
        chain_id: impl Into<String>,
        address: impl Into<String>,
        kind: TxKind,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            chain_id: chain_id.into(),
            address: address.into(),
            added_at: now_millis(),
            retry_count: 0,
            kind,
        }
    }

    fn same_tx(&self, tx_hash: &str, chain_id: &str) -> bool {
        self.tx_hash == tx_hash && self.chain_id == chain_id
    }

    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.added_at) > TX_TIMEOUT.as_millis() as u64
            || self.retry_count >= MAX_RETRY_COUNT
            || self.tx_hash.is_empty()
    }
}

pub struct TxTracker {
    store: Arc<dyn KeyValueStore>,
}

impl TxTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Track a submitted transaction; a second add of the same (hash, chain) is ignored
    pub async fn add(&self, tx: TrackedTx) -> Result<bool, StoreError> {
        let hash = tx.tx_hash.clone();
        let added = modify(self.store.as_ref(), TRACKED_TXS_KEY, move |txs: &mut Vec<TrackedTx>| {
            if txs.iter().any(|t| t.same_tx(&tx.tx_hash, &tx.chain_id)) {
                false
            } else {
                txs.push(tx);
                true
            }
        })
        .await?;

        if added {
            tracing::info!("Tracking tx {}", hash);
        }
        Ok(added)
    }

    /// Count one failed status poll
    pub async fn record_retry(&self, tx_hash: &str, chain_id: &str) -> Result<(), StoreError> {
        let (hash, chain) = (tx_hash.to_string(), chain_id.to_string());
        modify(self.store.as_ref(), TRACKED_TXS_KEY, move |txs: &mut Vec<TrackedTx>| {
            if let Some(tx) = txs.iter_mut().find(|t| t.same_tx(&hash, &chain)) {
                tx.retry_count += 1;
            }
        })
        .await
    }

    /// Drop a transaction once its terminal status is known
    pub async fn remove(&self, tx_hash: &str, chain_id: &str) -> Result<(), StoreError> {
        let (hash, chain) = (tx_hash.to_string(), chain_id.to_string());
        modify(self.store.as_ref(), TRACKED_TXS_KEY, move |txs: &mut Vec<TrackedTx>| {
            txs.retain(|t| !t.same_tx(&hash, &chain));
        })
        .await
    }

    /// Evict timed-out / retry-exhausted entries and return the rest for polling
    pub async fn due(&self, now: u64) -> Result<Vec<TrackedTx>, StoreError> {
        modify(self.store.as_ref(), TRACKED_TXS_KEY, move |txs: &mut Vec<TrackedTx>| {
            txs.retain(|tx| {
                let expired = tx.is_expired(now);
                if expired {
                    tracing::warn!(
                        "Giving up on tx {} / {} after {} retries",
                        tx.tx_hash,
                        tx.chain_id,
                        tx.retry_count
                    );
                }
                !expired
            });
            txs.clone()
        })
        .await
    }

    pub async fn all(&self) -> Result<Vec<TrackedTx>, StoreError> {
        load(self.store.as_ref(), TRACKED_TXS_KEY).await
    }
}
