// Saga states
// Reserved -> Signed -> Submitted. Each transition is a pure function over
// data; the network and signing calls live in the executor.

use async_trait::async_trait;
use base64::prelude::*;
use serde_json::Value;

use super::service::{unwrap_payload, unwrap_reserve_payload, CoinRef, ExecuteRequest, GasSponsorReservation};
use super::{Phase, SponsorError};

/// Unsigned transaction handed to the signer
///
/// `kind` is the chain-specific program and is passed through untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionDraft {
    pub sender: String,
    pub kind: Value,
    pub gas_owner: Option<String>,
    pub gas_payment: Vec<CoinRef>,
    pub gas_budget: Option<u64>,
}

impl TransactionDraft {
    pub fn new(sender: impl Into<String>, kind: Value) -> Self {
        Self {
            sender: sender.into(),
            kind,
            gas_owner: None,
            gas_payment: Vec::new(),
            gas_budget: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx_bytes: Vec<u8>,
    pub signature: String,
}

/// Opaque signing capability; key material never leaves it
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_transaction(&self, draft: &TransactionDraft) -> anyhow::Result<SignedTransaction>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reserved {
    pub reservation: GasSponsorReservation,
    pub effective_budget: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signed {
    pub reservation: GasSponsorReservation,
    pub transaction: SignedTransaction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Submitted {
    pub reservation_id: String,
    /// Unwrapped sponsor payload, guaranteed free of an `error` member
    pub result: Value,
}

impl Reserved {
    pub fn from_response(raw: &Value, effective_budget: u64) -> Result<Self, SponsorError> {
        let payload = unwrap_reserve_payload(raw).ok_or_else(|| SponsorError::InvalidResponse {
            phase: Phase::Reserve,
            reason: "no reservation in response body".into(),
        })?;

        Ok(Self {
            reservation: GasSponsorReservation::from_payload(payload)?,
            effective_budget,
        })
    }

    /// Make the sponsor the fee payer with its reserved coins
    pub fn bind(&self, mut draft: TransactionDraft) -> TransactionDraft {
        draft.gas_owner = Some(self.reservation.sponsor_address.clone());
        draft.gas_payment = self.reservation.gas_coins.clone();
        draft.gas_budget = Some(self.effective_budget);
        draft
    }

    pub fn sign(self, transaction: SignedTransaction) -> Signed {
        Signed {
            reservation: self.reservation,
            transaction,
        }
    }
}

impl Signed {
    pub fn execute_request(&self) -> ExecuteRequest {
        ExecuteRequest {
            reservation_id: self.reservation.reservation_id.clone(),
            tx_bytes: BASE64_STANDARD.encode(&self.transaction.tx_bytes),
            user_sig: self.transaction.signature.clone(),
        }
    }

    pub fn submit(self, raw: &Value) -> Result<Submitted, SponsorError> {
        let payload = unwrap_payload(raw).ok_or_else(|| SponsorError::InvalidResponse {
            phase: Phase::Submit,
            reason: "no payload under result, data.result or data".into(),
        })?;

        if let Some(message) = error_message(payload) {
            return Err(SponsorError::ExecutionFailed(message));
        }

        Ok(Submitted {
            reservation_id: self.reservation.reservation_id,
            result: payload.clone(),
        })
    }
}

fn error_message(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Null => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(object) => match object.get("message") {
            Some(Value::String(message)) if !message.is_empty() => Some(message.clone()),
            _ => Some(Value::Object(object.clone()).to_string()),
        },
        other => Some(other.to_string()),
    }
}
