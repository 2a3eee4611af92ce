// Sponsored execution
// Gas for a user transaction is paid by an external sponsor service: reserve
// gas coins, bind them to the transaction and sign, then submit through the
// sponsor. Each phase is a typed state so the order cannot be violated.

mod executor;
mod saga;
mod service;

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::failover::EndpointError;

pub use executor::{Execution, FallbackExecutor, GasPayment, SponsoredExecutor};
pub use saga::{Reserved, SignedTransaction, Signed, Signer, Submitted, TransactionDraft};
pub use service::{
    unwrap_payload, unwrap_reserve_payload, CoinRef, ExecuteRequest, GasSponsorReservation,
    HttpSponsorService, ReserveRequest, SponsorService,
};

/// Smallest budget ever sent to the sponsor (5 OCT)
pub const MIN_SPONSORED_GAS_BUDGET: u64 = 5_000_000_000;
pub const DEFAULT_RESERVE_DURATION_SECS: u64 = 60;
pub const DEFAULT_SPONSOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Saga phase a failure belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Reserve,
    Sign,
    Submit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Reserve => write!(f, "reserve"),
            Phase::Sign => write!(f, "sign"),
            Phase::Submit => write!(f, "submit"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SponsorError {
    /// Reserve answered but without a usable reservation
    #[error("gas reservation rejected: {0}")]
    Reservation(String),

    #[error("signing failed: {0}")]
    Signing(String),

    /// Sponsor reported an error for the submitted transaction
    #[error("sponsored execution reported an error: {0}")]
    ExecutionFailed(String),

    #[error("invalid {phase} response: {reason}")]
    InvalidResponse { phase: Phase, reason: String },

    /// No usable answer; remote state unknown
    #[error("{phase} request failed: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: EndpointError,
    },
}

impl SponsorError {
    pub fn phase(&self) -> Phase {
        match self {
            SponsorError::Reservation(_) => Phase::Reserve,
            SponsorError::Signing(_) => Phase::Sign,
            SponsorError::ExecutionFailed(_) => Phase::Submit,
            SponsorError::InvalidResponse { phase, .. } | SponsorError::Transport { phase, .. } => {
                *phase
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SponsorConfig {
    /// Gas pool switch; sponsorship is never attempted when off
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_gas_budget")]
    pub gas_budget: u64,
    #[serde(default = "default_reserve_duration_secs")]
    pub reserve_duration_secs: u64,
}

impl SponsorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured budget raised to the sponsor floor
    pub fn effective_gas_budget(&self) -> u64 {
        effective_gas_budget(self.gas_budget)
    }
}

impl Default for SponsorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            timeout_secs: default_timeout_secs(),
            gas_budget: default_gas_budget(),
            reserve_duration_secs: default_reserve_duration_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_SPONSOR_TIMEOUT.as_secs()
}

fn default_gas_budget() -> u64 {
    MIN_SPONSORED_GAS_BUDGET
}

fn default_reserve_duration_secs() -> u64 {
    DEFAULT_RESERVE_DURATION_SECS
}

pub fn effective_gas_budget(requested: u64) -> u64 {
    requested.max(MIN_SPONSORED_GAS_BUDGET)
}

pub fn should_use_sponsored_gas(enabled: bool, gas_budget: u64) -> bool {
    enabled && gas_budget > 0
}

/// Whether a message describes a definite on-chain rejection
pub fn is_execution_failure_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("moveabort")
        || lower.contains("execution failed")
        || lower.contains("transaction execution failed")
        || (lower.contains("status") && lower.contains("failure"))
}

/// Definite rejections must be shown as failed, never silently re-executed
/// with user gas. Everything else is ambiguous.
pub fn is_execution_failure_error(error: &SponsorError) -> bool {
    match error {
        SponsorError::ExecutionFailed(message) => is_execution_failure_message(message),
        SponsorError::Transport {
            source: EndpointError::Status { body, .. },
            ..
        } => is_execution_failure_message(body),
        _ => false,
    }
}

/// Submit attempts with no usable answer; the transaction may have landed
pub fn is_ambiguous_failure(error: &SponsorError) -> bool {
    match error {
        SponsorError::Transport {
            phase: Phase::Submit,
            source,
        } => !matches!(source, EndpointError::Status { .. } | EndpointError::Rpc { .. }),
        SponsorError::InvalidResponse {
            phase: Phase::Submit,
            ..
        } => true,
        _ => false,
    }
}
