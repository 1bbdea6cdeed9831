//! Uphold driver: generic submit -> acknowledge -> poll shape (spec.md §9
//! gives no vendor-specific behavior beyond that).

use super::generic::{self, VendorBackend};
use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::AuthenticatedPaymentState;

pub struct UpholdDriver<B: VendorBackend> {
    backend: B,
}

impl<B: VendorBackend> UpholdDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: VendorBackend> CustodianDriver for UpholdDriver<B> {
    async fn pay(&self, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        generic::pay(&self.backend, state).await
    }

    async fn fail(&self, state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        generic::fail(&self.backend, state, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custodians::generic::{PollResult, SubmitAck, VendorError};
    use crate::model::{PaymentDetails, Status, IDEMPOTENCY_NAMESPACE};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubBackend {
        settle_immediately: bool,
        submitted: AtomicBool,
    }

    impl VendorBackend for StubBackend {
        async fn submit(
            &self,
            _idempotency_key: &str,
            _to: &str,
            _amount: rust_decimal::Decimal,
            _currency: &str,
        ) -> Result<SubmitAck, VendorError> {
            self.submitted.store(true, Ordering::SeqCst);
            Ok(SubmitAck {
                block_hash: "uphold-block-1".into(),
                signature: "uphold-sig-1".into(),
                settled: self.settle_immediately,
            })
        }

        async fn poll(&self, _block_hash: &str) -> Result<PollResult, VendorError> {
            Ok(PollResult::Settled)
        }

        async fn cancel(&self, _block_hash: &str) {}
    }

    fn details() -> PaymentDetails {
        PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "card-1".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "10.00".parse().unwrap(),
            custodian: "uphold".into(),
            payout_id: "payout-uphold-1".into(),
            currency: "USD".into(),
            dry_run: None,
        }
    }

    #[tokio::test]
    async fn submits_then_settles_immediately() {
        let driver = UpholdDriver::new(StubBackend { settle_immediately: true, submitted: AtomicBool::new(false) });
        let state = AuthenticatedPaymentState::new(details());
        let outcome = driver.pay(&state).await.unwrap();
        assert_eq!(
            outcome,
            DriveOutcome::Transition {
                status: Status::Paid,
                external_idempotency: Some(crate::model::ExternalIdempotency {
                    block_hash: "uphold-block-1".into(),
                    signature: "uphold-sig-1".into(),
                }),
            }
        );
    }
}
