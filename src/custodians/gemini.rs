//! Gemini driver: generic submit -> acknowledge -> poll shape.

use super::generic::{self, VendorBackend};
use super::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::model::AuthenticatedPaymentState;

pub struct GeminiDriver<B: VendorBackend> {
    backend: B,
}

impl<B: VendorBackend> GeminiDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: VendorBackend> CustodianDriver for GeminiDriver<B> {
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
    use crate::model::{PaymentDetails, IDEMPOTENCY_NAMESPACE};

    struct RejectingBackend;
    impl VendorBackend for RejectingBackend {
        async fn submit(
            &self,
            _idempotency_key: &str,
            _to: &str,
            _amount: rust_decimal::Decimal,
            _currency: &str,
        ) -> Result<SubmitAck, VendorError> {
            Err(VendorError::Permanent("unknown beneficiary account".into()))
        }

        async fn poll(&self, _block_hash: &str) -> Result<PollResult, VendorError> {
            unreachable!("never reaches poll without a successful submit")
        }

        async fn cancel(&self, _block_hash: &str) {}
    }

    #[tokio::test]
    async fn permanent_submission_failure_is_a_terminal_failure_not_an_error() {
        let driver = GeminiDriver::new(RejectingBackend);
        let details = PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "unknown-acct".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "1.00".parse().unwrap(),
            custodian: "gemini".into(),
            payout_id: "payout-gem-1".into(),
            currency: "USD".into(),
            dry_run: None,
        };
        let state = AuthenticatedPaymentState::new(details);
        let outcome = driver.pay(&state).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Failed { temporary: false, .. }));
    }
}
