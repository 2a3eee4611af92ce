use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::failover::{fetch_with_failover, AllEndpointsFailedError, EndpointError};

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// JSON-RPC 2.0 client reading from a per-chain endpoint list
pub struct RpcClient {
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` on the first endpoint that answers with a `result`
    pub async fn call<T: DeserializeOwned>(
        &self,
        endpoints: &[String],
        method: &str,
        params: Value,
    ) -> Result<T, AllEndpointsFailedError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        tracing::debug!("RPC {} over {} endpoint(s)", method, endpoints.len());

        fetch_with_failover(endpoints, self.timeout, |url| {
            let http = self.http.clone();
            let body = body.clone();
            async move {
                let resp = http.post(&url).json(&body).send().await?;

                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_else(|_| "Unknown".to_string());
                    return Err(EndpointError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }

                let rpc: RpcResponse = resp.json().await?;
                if let Some(error) = rpc.error {
                    return Err(EndpointError::Rpc {
                        code: error.code,
                        message: error.message,
                    });
                }

                let result = rpc
                    .result
                    .ok_or_else(|| EndpointError::Decode("response has no result".into()))?;
                serde_json::from_value(result).map_err(|e| EndpointError::Decode(e.to_string()))
            }
        })
        .await
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_TIMEOUT)
    }
}
