// Multi-endpoint failover
// Tries an ordered endpoint list strictly in sequence and returns the first
// success. No backoff between endpoints and no retry of the same endpoint.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single endpoint attempt
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Domain-level `error` member in an otherwise successful response
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for EndpointError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            EndpointError::Decode(e.to_string())
        } else {
            EndpointError::Network(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AllEndpointsFailedError {
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Only the last endpoint's error is carried; earlier ones are logged
    #[error("all {} endpoints failed, last ({}): {last}", .attempted.len(), .attempted.last().map(String::as_str).unwrap_or("-"))]
    Exhausted {
        attempted: Vec<String>,
        #[source]
        last: EndpointError,
    },
}

impl AllEndpointsFailedError {
    pub fn last_error(&self) -> Option<&EndpointError> {
        match self {
            AllEndpointsFailedError::NoEndpoints => None,
            AllEndpointsFailedError::Exhausted { last, .. } => Some(last),
        }
    }
}

/// Run `op` against each endpoint in order until one succeeds
///
/// `timeout` bounds each attempt individually, not the whole call.
pub async fn fetch_with_failover<T, F, Fut>(
    endpoints: &[String],
    timeout: Duration,
    mut op: F,
) -> Result<T, AllEndpointsFailedError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, EndpointError>>,
{
    let mut failures: Vec<(String, EndpointError)> = Vec::new();

    for endpoint in endpoints {
        let outcome = match tokio::time::timeout(timeout, op(endpoint.clone())).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EndpointError::Timeout(timeout)),
        };

        match outcome {
            Ok(value) => {
                if !failures.is_empty() {
                    tracing::info!(
                        "✅ {} succeeded after {} failed endpoint(s)",
                        endpoint,
                        failures.len()
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!("Endpoint {} failed: {}", endpoint, e);
                failures.push((endpoint.clone(), e));
            }
        }
    }

    let Some((_, last)) = failures.pop() else {
        return Err(AllEndpointsFailedError::NoEndpoints);
    };

    for (endpoint, error) in &failures {
        tracing::debug!("  earlier failure at {}: {}", endpoint, error);
    }

    Err(AllEndpointsFailedError::Exhausted {
        attempted: endpoints.to_vec(),
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn urls(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_second_endpoint_wins_and_third_untouched() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();

        let value = fetch_with_failover(&urls(&["a", "b", "c"]), Duration::from_secs(1), |url| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(url.clone());
                match url.as_str() {
                    "a" => Err(EndpointError::Network("connection refused".into())),
                    _ => Ok(format!("from {}", url)),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "from b");
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_endpoint() {
        let err = fetch_with_failover::<(), _, _>(&urls(&["a", "b", "c"]), Duration::from_secs(1), |url| async move {
            Err(EndpointError::Status {
                status: 502,
                body: url,
            })
        })
        .await
        .unwrap_err();

        match err {
            AllEndpointsFailedError::Exhausted { attempted, last } => {
                assert_eq!(attempted, vec!["a", "b", "c"]);
                assert!(matches!(last, EndpointError::Status { body, .. } if body == "c"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_endpoint_list() {
        let err = fetch_with_failover::<(), _, _>(&[], Duration::from_secs(1), |_| async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, AllEndpointsFailedError::NoEndpoints));
        assert!(err.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_applies_per_attempt() {
        let start = tokio::time::Instant::now();

        let value = fetch_with_failover(&urls(&["slow", "fast"]), Duration::from_secs(5), |url| async move {
            if url == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, EndpointError>(url)
        })
        .await
        .unwrap();

        assert_eq!(value, "fast");
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
