//! Shared submit -> acknowledge -> poll shape used by the Uphold, Bitflyer,
//! and Gemini drivers. Each vendor's actual transport is out of scope
//! (spec.md §1); `VendorBackend` is the seam, mirroring how the teacher
//! treats `sncast`/the bridge binary in `bridge.rs`.

use rust_decimal::Decimal;

use super::DriveOutcome;
use crate::error::PaymentError;
use crate::model::{AuthenticatedPaymentState, ExternalIdempotency, Status};

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitAck {
    pub block_hash: String,
    pub signature: String,
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    StillPending,
    Settled,
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VendorError {
    /// Network/5xx-class failure; safe to retry the same submission.
    Temporary(String),
    /// Vendor rejected the request outright; retrying would not help.
    Permanent(String),
}

pub trait VendorBackend: Send + Sync + 'static {
    fn submit(
        &self,
        idempotency_key: &str,
        to: &str,
        amount: Decimal,
        currency: &str,
    ) -> impl std::future::Future<Output = Result<SubmitAck, VendorError>> + Send;

    fn poll(
        &self,
        block_hash: &str,
    ) -> impl std::future::Future<Output = Result<PollResult, VendorError>> + Send;

    fn cancel(&self, block_hash: &str) -> impl std::future::Future<Output = ()> + Send;
}

pub async fn pay<B: VendorBackend>(backend: &B, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
    match &state.external_idempotency {
        None => {
            let idempotency_key = state.document_id.to_string();
            match backend
                .submit(
                    &idempotency_key,
                    &state.payment_details.to,
                    state.payment_details.amount,
                    &state.payment_details.currency,
                )
                .await
            {
                Ok(ack) => {
                    let external_idempotency = Some(ExternalIdempotency {
                        block_hash: ack.block_hash,
                        signature: ack.signature,
                    });
                    let status = if ack.settled { Status::Paid } else { Status::Pending };
                    Ok(DriveOutcome::Transition { status, external_idempotency })
                }
                Err(VendorError::Temporary(msg)) => Err(PaymentError::Temporary(msg)),
                Err(VendorError::Permanent(msg)) => Ok(DriveOutcome::Failed { message: msg, temporary: false }),
            }
        }
        Some(existing) => match backend.poll(&existing.block_hash).await {
            Ok(PollResult::StillPending) => Ok(DriveOutcome::Transition {
                status: Status::Pending,
                external_idempotency: Some(existing.clone()),
            }),
            Ok(PollResult::Settled) => Ok(DriveOutcome::Transition {
                status: Status::Paid,
                external_idempotency: Some(existing.clone()),
            }),
            Ok(PollResult::Rejected { message }) => Ok(DriveOutcome::Failed { message, temporary: false }),
            Err(VendorError::Temporary(msg)) => Err(PaymentError::Temporary(msg)),
            Err(VendorError::Permanent(msg)) => Ok(DriveOutcome::Failed { message: msg, temporary: false }),
        },
    }
}

pub async fn fail<B: VendorBackend>(backend: &B, state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
    if let Some(existing) = &state.external_idempotency {
        backend.cancel(&existing.block_hash).await;
    }
    DriveOutcome::Failed { message: reason.to_string(), temporary: false }
}
