//! Zebpay driver (spec.md §8 scenarios S1/S2): submits a transfer signed
//! with the unsealed Zebpay signing key, then polls until settlement.
//! S1 is the straight-through happy path; S2 is a transfer that sits
//! `Pending` across one or more polls before settling.

use rust_decimal::Decimal;

use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::{AuthenticatedPaymentState, ExternalIdempotency, Status};

#[derive(Debug, Clone, PartialEq)]
pub struct ZebpayAck {
    pub reference: String,
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZebpayPollResult {
    StillPending,
    Settled,
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZebpayError {
    Temporary(String),
    Permanent(String),
}

/// Out-of-scope vendor transport per spec.md §1.
pub trait ZebpayBackend: Send + Sync + 'static {
    fn submit_transfer(
        &self,
        api_key: &str,
        signing_key: &str,
        idempotency_key: &str,
        to: &str,
        amount: Decimal,
        currency: &str,
    ) -> impl std::future::Future<Output = Result<ZebpayAck, ZebpayError>> + Send;

    fn poll_transfer(
        &self,
        api_key: &str,
        reference: &str,
    ) -> impl std::future::Future<Output = Result<ZebpayPollResult, ZebpayError>> + Send;
}

pub struct ZebpayDriver<B: ZebpayBackend> {
    api_key: String,
    signing_key: String,
    backend: B,
}

impl<B: ZebpayBackend> ZebpayDriver<B> {
    pub fn new(api_key: String, signing_key: String, backend: B) -> Self {
        Self { api_key, signing_key, backend }
    }
}

impl<B: ZebpayBackend> CustodianDriver for ZebpayDriver<B> {
    async fn pay(&self, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        match &state.external_idempotency {
            None => {
                let idempotency_key = state.document_id.to_string();
                match self
                    .backend
                    .submit_transfer(
                        &self.api_key,
                        &self.signing_key,
                        &idempotency_key,
                        &state.payment_details.to,
                        state.payment_details.amount,
                        &state.payment_details.currency,
                    )
                    .await
                {
                    Ok(ack) => {
                        let external_idempotency = Some(ExternalIdempotency {
                            block_hash: ack.reference.clone(),
                            signature: idempotency_key,
                        });
                        let status = if ack.settled { Status::Paid } else { Status::Pending };
                        Ok(DriveOutcome::Transition { status, external_idempotency })
                    }
                    Err(ZebpayError::Temporary(msg)) => Err(PaymentError::Temporary(msg)),
                    Err(ZebpayError::Permanent(msg)) => Ok(DriveOutcome::Failed { message: msg, temporary: false }),
                }
            }
            Some(existing) => match self.backend.poll_transfer(&self.api_key, &existing.block_hash).await {
                Ok(ZebpayPollResult::StillPending) => Ok(DriveOutcome::Transition {
                    status: Status::Pending,
                    external_idempotency: Some(existing.clone()),
                }),
                Ok(ZebpayPollResult::Settled) => Ok(DriveOutcome::Transition {
                    status: Status::Paid,
                    external_idempotency: Some(existing.clone()),
                }),
                Ok(ZebpayPollResult::Rejected { message }) => {
                    Ok(DriveOutcome::Failed { message, temporary: false })
                }
                Err(ZebpayError::Temporary(msg)) => Err(PaymentError::Temporary(msg)),
                Err(ZebpayError::Permanent(msg)) => Ok(DriveOutcome::Failed { message: msg, temporary: false }),
            },
        }
    }

    async fn fail(&self, _state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        // Zebpay exposes no cancel endpoint; a submitted transfer runs to
        // settlement regardless. Record the failure locally only.
        DriveOutcome::Failed { message: reason.to_string(), temporary: false }
    }
}
