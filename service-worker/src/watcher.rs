// Tracked transaction watcher
// Polls chain RPC for every tracked transaction until it settles, counting a
// retry for each poll that returns nothing conclusive.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use gas_sponsor_client::RpcClient;
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use wallet_extension_core::{now_millis, TrackedTx, TxTracker};

pub const GET_TRANSACTION_METHOD: &str = "sui_getTransactionBlock";

#[derive(Debug, PartialEq, Eq)]
enum Settlement {
    Success,
    Failure(String),
    Pending,
}

pub struct TxWatcher {
    tracker: TxTracker,
    rpc: RpcClient,
    endpoints: HashMap<String, Vec<String>>,
}

impl TxWatcher {
    pub fn new(tracker: TxTracker, rpc: RpcClient, endpoints: HashMap<String, Vec<String>>) -> Self {
        Self {
            tracker,
            rpc,
            endpoints,
        }
    }

    pub async fn run(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                tracing::error!("Transaction watcher pass failed: {:#}", e);
            }
        }
    }

    /// One pass over the due transactions; returns how many settled
    ///
    /// A store failure on one transaction is logged and the pass moves on.
    pub async fn poll_once(&self) -> Result<usize> {
        let due = self.tracker.due(now_millis()).await?;
        let mut settled = 0;

        for tx in due {
            let outcome = match self.settlement(&tx).await {
                Settlement::Success => {
                    tracing::info!("✅ Transaction {} succeeded on {}", tx.tx_hash, tx.chain_id);
                    self.tracker.remove(&tx.tx_hash, &tx.chain_id).await.map(|_| true)
                }
                Settlement::Failure(reason) => {
                    tracing::warn!(
                        "Transaction {} failed on {}: {}",
                        tx.tx_hash,
                        tx.chain_id,
                        reason
                    );
                    self.tracker.remove(&tx.tx_hash, &tx.chain_id).await.map(|_| true)
                }
                Settlement::Pending => self
                    .tracker
                    .record_retry(&tx.tx_hash, &tx.chain_id)
                    .await
                    .map(|_| false),
            };

            match outcome {
                Ok(true) => settled += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to update tracked tx {}: {}", tx.tx_hash, e),
            }
        }

        Ok(settled)
    }

    async fn settlement(&self, tx: &TrackedTx) -> Settlement {
        let Some(endpoints) = self.endpoints.get(&tx.chain_id) else {
            tracing::warn!("No RPC endpoints for chain {}", tx.chain_id);
            return Settlement::Pending;
        };

        let response: Value = match self
            .rpc
            .call(
                endpoints,
                GET_TRANSACTION_METHOD,
                json!([tx.tx_hash, { "showEffects": true }]),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Status of {} unavailable: {}", tx.tx_hash, e);
                return Settlement::Pending;
            }
        };

        let status = &response["effects"]["status"];
        match status["status"].as_str() {
            Some("success") => Settlement::Success,
            Some(_) => Settlement::Failure(
                status["error"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
            None => Settlement::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wallet_extension_core::services::UpdateFn;
    use wallet_extension_core::tracker::TRACKED_TXS_KEY;
    use wallet_extension_core::{KeyValueStore, MemoryStore, StoreError, TxKind};

    /// Memory store whose `fail_on`-th update fails
    struct FlakyStore {
        inner: MemoryStore,
        updates: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn update<'a>(&self, key: &str, apply: UpdateFn<'a>) -> Result<(), StoreError> {
            if self.updates.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(StoreError::Aborted);
            }
            self.inner.update(key, apply).await
        }
    }

    fn watcher(store: Arc<MemoryStore>, rpc_url: Option<String>) -> TxWatcher {
        let mut endpoints = HashMap::new();
        if let Some(url) = rpc_url {
            endpoints.insert("sui:testnet".to_string(), vec![url]);
        }
        TxWatcher::new(
            TxTracker::new(store),
            RpcClient::new(Duration::from_secs(5)),
            endpoints,
        )
    }

    async fn track(store: &Arc<MemoryStore>, hash: &str) {
        TxTracker::new(store.clone())
            .add(TrackedTx::new(hash, "sui:testnet", "0xuser", TxKind::Default))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settled_transactions_are_removed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/").body_contains("0xok");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {"effects": {"status": {"status": "success"}}}
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/").body_contains("0xbad");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {"effects": {"status": {"status": "failure", "error": "InsufficientGas"}}}
                }));
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        track(&store, "0xok").await;
        track(&store, "0xbad").await;

        let settled = watcher(store.clone(), Some(server.base_url()))
            .poll_once()
            .await
            .unwrap();

        assert_eq!(settled, 2);
        assert!(TxTracker::new(store).all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_status_counts_a_retry() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "error": {"code": -32602, "message": "Could not find the referenced transaction"}
                }));
            })
            .await;

        let store = Arc::new(MemoryStore::new());
        track(&store, "0xpending").await;

        let settled = watcher(store.clone(), Some(server.base_url()))
            .poll_once()
            .await
            .unwrap();

        assert_eq!(settled, 0);
        let left = TxTracker::new(store).all().await.unwrap();
        assert_eq!(left[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_chain_without_endpoints_is_retried_then_dropped() {
        let store = Arc::new(MemoryStore::new());
        track(&store, "0xorphan").await;
        let watcher = watcher(store.clone(), None);

        for _ in 0..wallet_extension_core::tracker::MAX_RETRY_COUNT {
            watcher.poll_once().await.unwrap();
        }
        watcher.poll_once().await.unwrap();

        assert!(TxTracker::new(store).all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_skip_remaining_transactions() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0", "id": 1,
                    "result": {"effects": {"status": {"status": "success"}}}
                }));
            })
            .await;

        let seed = Arc::new(MemoryStore::new());
        track(&seed, "0xfirst").await;
        track(&seed, "0xsecond").await;
        let tracked = TxTracker::new(seed).all().await.unwrap();

        let inner = MemoryStore::new();
        inner
            .set(TRACKED_TXS_KEY, serde_json::to_value(&tracked).unwrap())
            .await
            .unwrap();
        // Update 1 is the due sweep, update 2 the first removal
        let store = Arc::new(FlakyStore {
            inner,
            updates: AtomicUsize::new(0),
            fail_on: 2,
        });

        let mut endpoints = HashMap::new();
        endpoints.insert("sui:testnet".to_string(), vec![server.base_url()]);
        let settled = TxWatcher::new(
            TxTracker::new(store.clone()),
            RpcClient::new(Duration::from_secs(5)),
            endpoints,
        )
        .poll_once()
        .await
        .unwrap();

        assert_eq!(settled, 1);
        let left = TxTracker::new(store).all().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].tx_hash, "0xfirst");
    }
}
