use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use super::saga::{Reserved, Signer, Submitted, TransactionDraft};
use super::service::{ReserveRequest, SponsorService};
use super::{
    effective_gas_budget, is_ambiguous_failure, is_execution_failure_error,
    should_use_sponsored_gas, SponsorConfig, SponsorError,
};

/// Executes a transaction with the user's own gas
#[async_trait]
pub trait FallbackExecutor: Send + Sync {
    async fn execute_with_user_gas(&self, draft: TransactionDraft) -> anyhow::Result<Value>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasPayment {
    Sponsored,
    SelfFunded,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub paid_by: GasPayment,
    pub result: Value,
}

/// Drives the reserve / sign / submit saga
///
/// Never retries: a failed submit leaves the reservation to expire
/// server-side, and starting over means a new reservation.
pub struct SponsoredExecutor {
    service: Arc<dyn SponsorService>,
    signer: Arc<dyn Signer>,
    config: SponsorConfig,
}

impl SponsoredExecutor {
    pub fn new(service: Arc<dyn SponsorService>, signer: Arc<dyn Signer>, config: SponsorConfig) -> Self {
        Self {
            service,
            signer,
            config,
        }
    }

    /// Phase 1: claim sponsor gas for at least the minimum budget
    pub async fn reserve_sponsored_gas(
        &self,
        gas_budget: u64,
        reserve_duration_secs: u64,
    ) -> Result<Reserved, SponsorError> {
        let effective_budget = effective_gas_budget(gas_budget);
        let request = ReserveRequest {
            gas_budget: effective_budget,
            reserve_duration_secs,
        };

        let raw = self.service.reserve(&request).await?;
        let reserved = Reserved::from_response(&raw, effective_budget)?;

        tracing::info!(
            "⛽ Reserved sponsor gas {} from {} ({} coins, budget {})",
            reserved.reservation.reservation_id,
            reserved.reservation.sponsor_address,
            reserved.reservation.gas_coins.len(),
            effective_budget
        );

        Ok(reserved)
    }

    /// Reserve, bind and sign, then submit; each step exactly once, in order
    pub async fn execute_with_sponsored_gas(
        &self,
        draft: TransactionDraft,
        gas_budget: u64,
    ) -> Result<Submitted, SponsorError> {
        let reserved = self
            .reserve_sponsored_gas(gas_budget, self.config.reserve_duration_secs)
            .await?;

        let bound = reserved.bind(draft);
        let transaction = self
            .signer
            .sign_transaction(&bound)
            .await
            .map_err(|e| SponsorError::Signing(format!("{:#}", e)))?;
        let signed = reserved.sign(transaction);

        let raw = self.service.execute(&signed.execute_request()).await?;
        let submitted = signed.submit(&raw)?;

        tracing::info!("✅ Sponsored transaction submitted ({})", submitted.reservation_id);
        Ok(submitted)
    }

    /// Prefer sponsorship; fall back to user gas only when the sponsor attempt
    /// definitely did not land
    ///
    /// An on-chain rejection is returned as is. A submit with no usable answer
    /// is returned too: its outcome is unknown and resubmitting could execute
    /// the transaction twice.
    pub async fn execute(
        &self,
        draft: TransactionDraft,
        gas_budget: u64,
        fallback: &dyn FallbackExecutor,
    ) -> anyhow::Result<Execution> {
        if should_use_sponsored_gas(self.config.enabled, self.config.gas_budget) {
            match self.execute_with_sponsored_gas(draft.clone(), gas_budget).await {
                Ok(submitted) => {
                    return Ok(Execution {
                        paid_by: GasPayment::Sponsored,
                        result: submitted.result,
                    })
                }
                Err(e) if is_execution_failure_error(&e) => {
                    return Err(e).context("Sponsored transaction was rejected on-chain")
                }
                Err(e) if is_ambiguous_failure(&e) => {
                    tracing::warn!("Sponsored submit outcome unknown: {}", e);
                    return Err(e).context(
                        "Sponsored transaction status unknown, check it before resubmitting",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Gas sponsorship failed at {}, falling back to self-funded transaction: {}",
                        e.phase(),
                        e
                    );
                }
            }
        }

        let result = fallback
            .execute_with_user_gas(draft)
            .await
            .context("Failed to execute with user gas")?;

        Ok(Execution {
            paid_by: GasPayment::SelfFunded,
            result,
        })
    }
}
