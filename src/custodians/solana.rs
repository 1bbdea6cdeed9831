//! Solana driver (spec.md §8 scenarios S1/S2): broadcasts a transfer signed
//! with the unsealed Solana signing key against a recent blockhash, then
//! confirms it. S1 is confirmation on the first check; S2 is the
//! transaction falling out of the mempool before confirming, which the
//! runtime must retry against a fresh blockhash (`PaymentError::TransferDropped`).

use rust_decimal::Decimal;

use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::{AuthenticatedPaymentState, ExternalIdempotency, Status};

#[derive(Debug, Clone, PartialEq)]
pub enum SolanaConfirmation {
    Confirmed,
    StillProcessing,
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolanaError {
    Temporary(String),
    Permanent(String),
}

/// Out-of-scope RPC transport per spec.md §1.
pub trait SolanaBackend: Send + Sync + 'static {
    fn latest_blockhash(&self) -> impl std::future::Future<Output = Result<String, SolanaError>> + Send;

    fn submit_transfer(
        &self,
        signing_key: &str,
        blockhash: &str,
        to: &str,
        amount: Decimal,
    ) -> impl std::future::Future<Output = Result<String, SolanaError>> + Send;

    fn confirm(
        &self,
        signature: &str,
    ) -> impl std::future::Future<Output = Result<SolanaConfirmation, SolanaError>> + Send;
}

pub struct SolanaDriver<B: SolanaBackend> {
    signing_key: String,
    backend: B,
}

impl<B: SolanaBackend> SolanaDriver<B> {
    pub fn new(signing_key: String, backend: B) -> Self {
        Self { signing_key, backend }
    }
}

impl<B: SolanaBackend> CustodianDriver for SolanaDriver<B> {
    async fn pay(&self, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        match &state.external_idempotency {
            None => {
                let blockhash = self.backend.latest_blockhash().await.map_err(to_payment_error)?;
                let signature = self
                    .backend
                    .submit_transfer(&self.signing_key, &blockhash, &state.payment_details.to, state.payment_details.amount)
                    .await
                    .map_err(to_payment_error)?;
                Ok(DriveOutcome::Transition {
                    status: Status::Pending,
                    external_idempotency: Some(ExternalIdempotency { block_hash: blockhash, signature }),
                })
            }
            Some(existing) => match self.backend.confirm(&existing.signature).await {
                Ok(SolanaConfirmation::Confirmed) => Ok(DriveOutcome::Transition {
                    status: Status::Paid,
                    external_idempotency: Some(existing.clone()),
                }),
                Ok(SolanaConfirmation::StillProcessing) => Ok(DriveOutcome::Transition {
                    status: Status::Pending,
                    external_idempotency: Some(existing.clone()),
                }),
                // The transaction fell off the mempool before landing in a
                // block. The blockhash it was built against has since
                // expired, so it can never confirm — the runtime must clear
                // `external_idempotency` and resubmit against a fresh one.
                Ok(SolanaConfirmation::Dropped) => Err(PaymentError::TransferDropped),
                Err(e) => Err(to_payment_error(e)),
            },
        }
    }

    async fn fail(&self, _state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        DriveOutcome::Failed { message: reason.to_string(), temporary: false }
    }
}

fn to_payment_error(e: SolanaError) -> PaymentError {
    match e {
        SolanaError::Temporary(msg) => PaymentError::Temporary(msg),
        SolanaError::Permanent(msg) => PaymentError::TransferFailed(msg),
    }
}
