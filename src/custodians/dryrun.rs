//! Dry-run wrapper (spec.md §8 scenario S5, §9 Design Notes): forces the
//! `prepare`/`submit` failure scenarios requested via `paymentDetails.dryRun`
//! without touching any real custodian. Implemented as a closure wrapping a
//! base driver rather than a subclass, per spec.md §9.

use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::{dry_run_kind, AuthenticatedPaymentState, DryRunKind};

/// Wraps `inner` so that a matching `dryRun` stage short-circuits to a
/// deterministic failure instead of calling the real driver.
pub struct DryRunDriver<D: CustodianDriver> {
    inner: D,
}

impl<D: CustodianDriver> DryRunDriver<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

impl<D: CustodianDriver> CustodianDriver for DryRunDriver<D> {
    async fn pay(&self, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        match dry_run_kind(state) {
            Some(DryRunKind::Prepare) => Ok(DriveOutcome::Failed {
                message: "dry run: forced prepare failure".into(),
                temporary: false,
            }),
            Some(DryRunKind::Submit) => Ok(DriveOutcome::Failed {
                message: "dry run: forced submit failure".into(),
                temporary: false,
            }),
            None => self.inner.pay(state).await,
        }
    }

    async fn fail(&self, state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        self.inner.fail(state, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentDetails, Status, IDEMPOTENCY_NAMESPACE};

    struct AlwaysPaysDriver;
    impl CustodianDriver for AlwaysPaysDriver {
        async fn pay(&self, _state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
            Ok(DriveOutcome::Transition { status: Status::Paid, external_idempotency: None })
        }
        async fn fail(&self, _state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
            DriveOutcome::Failed { message: reason.to_string(), temporary: false }
        }
    }

    fn details(dry_run: Option<&str>) -> PaymentDetails {
        PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "512".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "1.00".parse().unwrap(),
            custodian: "zebpay".into(),
            payout_id: "payout-dry-1".into(),
            currency: "USD".into(),
            dry_run: dry_run.map(String::from),
        }
    }

    #[tokio::test]
    async fn forces_prepare_failure_when_requested() {
        let driver = DryRunDriver::new(AlwaysPaysDriver);
        let state = AuthenticatedPaymentState::new(details(Some("prepare")));
        let outcome = driver.pay(&state).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn passes_through_to_the_inner_driver_without_dry_run() {
        let driver = DryRunDriver::new(AlwaysPaysDriver);
        let state = AuthenticatedPaymentState::new(details(None));
        let outcome = driver.pay(&state).await.unwrap();
        assert_eq!(outcome, DriveOutcome::Transition { status: Status::Paid, external_idempotency: None });
    }
}
