//! Custodian Drivers (spec.md §4.7): one driver per downstream payout rail.
//! Uphold, Bitflyer, and Gemini share the generic submit -> acknowledge ->
//! poll shape (`generic`); Zebpay and Solana override it with
//! rail-specific submission and confirmation semantics. `dryrun` wraps a
//! driver to force the scenarios named in spec.md §8 — a closure around a
//! driver, not an inheritance chain (spec.md §9 Design Notes).

pub mod bitflyer;
pub mod dryrun;
pub mod gemini;
mod generic;
pub mod solana;
pub mod uphold;
pub mod zebpay;

use crate::error::PaymentError;
use crate::model::{AuthenticatedPaymentState, ExternalIdempotency, Status};

/// Result of driving one step of a transfer against a custodian.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveOutcome {
    /// Move to `status`, optionally recording the vendor's idempotency
    /// window for resubmission (`Pending`) or settlement proof (`Paid`).
    Transition {
        status: Status,
        external_idempotency: Option<ExternalIdempotency>,
    },
    /// Terminal vendor failure. `temporary` mirrors `PaymentError::temporary`
    /// so the runtime can still retry the drive loop on a transient one.
    Failed { message: String, temporary: bool },
}

pub trait CustodianDriver: Send + Sync + 'static {
    /// Advances the transfer by one step: submits if no external
    /// idempotency window is recorded yet, otherwise polls it.
    fn pay(
        &self,
        state: &AuthenticatedPaymentState,
    ) -> impl std::future::Future<Output = Result<DriveOutcome, PaymentError>> + Send;

    /// Best-effort vendor-side cancel, then reports a terminal failure.
    fn fail(
        &self,
        state: &AuthenticatedPaymentState,
        reason: &str,
    ) -> impl std::future::Future<Output = DriveOutcome> + Send;
}
