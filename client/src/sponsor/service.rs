use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Phase, SponsorConfig, SponsorError};
use crate::failover::EndpointError;

/// Gas coin owned by the sponsor
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoinRef {
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    pub digest: String,
}

/// Single-use, time-boxed claim on sponsor gas coins
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GasSponsorReservation {
    #[serde(deserialize_with = "string_or_number")]
    pub reservation_id: String,
    pub sponsor_address: String,
    pub gas_coins: Vec<CoinRef>,
}

#[derive(Deserialize)]
struct RawReservation {
    #[serde(default)]
    reservation_id: Option<Value>,
    #[serde(default)]
    sponsor_address: Option<String>,
    #[serde(default)]
    gas_coins: Vec<CoinRef>,
}

impl GasSponsorReservation {
    /// Parse an unwrapped reserve payload. A payload without a reservation id
    /// is a protocol violation.
    pub fn from_payload(payload: &Value) -> Result<Self, SponsorError> {
        let raw: RawReservation = serde_json::from_value(payload.clone()).map_err(|e| {
            SponsorError::InvalidResponse {
                phase: Phase::Reserve,
                reason: e.to_string(),
            }
        })?;

        let reservation_id = match raw.reservation_id {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(SponsorError::Reservation("response has no reservation_id".into())),
        };

        let sponsor_address = raw
            .sponsor_address
            .filter(|address| !address.is_empty())
            .ok_or_else(|| SponsorError::Reservation("response has no sponsor_address".into()))?;

        if raw.gas_coins.is_empty() {
            return Err(SponsorError::Reservation(format!(
                "reservation {} carries no gas coins",
                reservation_id
            )));
        }

        Ok(Self {
            reservation_id,
            sponsor_address,
            gas_coins: raw.gas_coins,
        })
    }
}

/// Body of `POST /gas/reserve`
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ReserveRequest {
    pub gas_budget: u64,
    pub reserve_duration_secs: u64,
}

/// Body of `POST /gas/executeTx`
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub reservation_id: String,
    /// Base64 of the signed transaction bytes
    pub tx_bytes: String,
    pub user_sig: String,
}

/// Pick the payload out of a sponsor response
///
/// Tried in order: `result`, `data.result`, `data`; the first non-empty
/// object wins.
pub fn unwrap_payload(raw: &Value) -> Option<&Value> {
    let candidates = [
        raw.get("result"),
        raw.get("data").and_then(|data| data.get("result")),
        raw.get("data"),
    ];

    candidates.into_iter().flatten().find(|candidate| is_non_empty_object(candidate))
}

/// Reserve bodies may also come back flat, with the reservation at top level
pub fn unwrap_reserve_payload(raw: &Value) -> Option<&Value> {
    unwrap_payload(raw).or_else(|| Some(raw).filter(|raw| is_non_empty_object(raw)))
}

fn is_non_empty_object(value: &Value) -> bool {
    value.as_object().is_some_and(|object| !object.is_empty())
}

/// Network side of the sponsor protocol; returns raw response bodies
#[async_trait]
pub trait SponsorService: Send + Sync {
    async fn reserve(&self, request: &ReserveRequest) -> Result<Value, SponsorError>;

    async fn execute(&self, request: &ExecuteRequest) -> Result<Value, SponsorError>;
}

pub struct HttpSponsorService {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSponsorService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SponsorConfig) -> Self {
        Self::new(config.base_url.clone(), config.timeout())
    }

    async fn post<B: Serialize + Sync>(
        &self,
        phase: Phase,
        path: &str,
        body: &B,
    ) -> Result<Value, SponsorError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let failed = |source| SponsorError::Transport { phase, source };

        tracing::debug!("POST {} ({})", url, phase);

        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| failed(self.endpoint_error(e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_else(|_| "Unknown".to_string());
            return Err(failed(EndpointError::Status {
                status: status.as_u16(),
                body,
            }));
        }

        resp.json()
            .await
            .map_err(|e| failed(self.endpoint_error(e)))
    }

    fn endpoint_error(&self, e: reqwest::Error) -> EndpointError {
        if e.is_timeout() {
            EndpointError::Timeout(self.timeout)
        } else {
            EndpointError::from(e)
        }
    }
}

#[async_trait]
impl SponsorService for HttpSponsorService {
    async fn reserve(&self, request: &ReserveRequest) -> Result<Value, SponsorError> {
        self.post(Phase::Reserve, "/gas/reserve", request).await
    }

    async fn execute(&self, request: &ExecuteRequest) -> Result<Value, SponsorError> {
        self.post(Phase::Submit, "/gas/executeTx", request).await
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
