//! State Machine Runtime (spec.md §4.6): drives a single authorized payment
//! through its custodian one step at a time under a fixed deadline,
//! persisting every observed transition and classifying errors so the
//! caller knows whether a retry is worthwhile.

use std::time::Duration;

use ed25519_dalek::SigningKey;
use uuid::Uuid;

use crate::custodians::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::ledger::{self, Ledger};
use crate::model::{AuthenticatedPaymentState, PaymentErrorInfo, Status};
use crate::persister;

/// Wall-clock budget for a single `drive()` call, spec.md §4.6.
pub const DRIVE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Drives `document_id` one custodian step forward and persists the
/// result. Returns `Err(PaymentError::InsufficientAuthorizations)` as a
/// no-op for payments still `Prepared` — callers treat that as success
/// (spec.md §7).
pub async fn drive<L, D>(
    ledger: &L,
    signing_key: &SigningKey,
    namespace: &Uuid,
    driver: &D,
    document_id: Uuid,
) -> Result<AuthenticatedPaymentState, PaymentError>
where
    L: Ledger,
    D: CustodianDriver,
{
    match tokio::time::timeout(DRIVE_DEADLINE, drive_inner(ledger, signing_key, namespace, driver, document_id)).await
    {
        Ok(result) => result,
        Err(_) => Err(PaymentError::DeadlineExceeded),
    }
}

async fn drive_inner<L, D>(
    ledger: &L,
    signing_key: &SigningKey,
    namespace: &Uuid,
    driver: &D,
    document_id: Uuid,
) -> Result<AuthenticatedPaymentState, PaymentError>
where
    L: Ledger,
    D: CustodianDriver,
{
    let latest = ledger::verify_history(ledger, document_id, namespace, signing_key.verifying_key().as_bytes())
        .await?
        .ok_or_else(|| PaymentError::HistoryCorrupt("no history for document".into()))?;
    let mut state: AuthenticatedPaymentState = serde_json::from_slice(&latest.data.unsafe_payment_state)
        .map_err(|e| PaymentError::HistoryCorrupt(e.to_string()))?;

    if state.status.is_terminal() {
        return Ok(state);
    }
    if state.status == Status::Prepared {
        return Err(PaymentError::InsufficientAuthorizations);
    }

    loop {
        match driver.pay(&state).await {
            Ok(DriveOutcome::Transition { status, external_idempotency }) => {
                let unchanged = status == state.status && external_idempotency == state.external_idempotency;
                state.status = status;
                state.external_idempotency = external_idempotency;
                state.last_error = None;
                if !unchanged {
                    persister::persist(ledger, signing_key, namespace, &state).await?;
                }
                return Ok(state);
            }
            Ok(DriveOutcome::Failed { message, temporary }) => {
                state.status = Status::Failed;
                state.last_error = Some(PaymentErrorInfo { message, temporary });
                persister::persist(ledger, signing_key, namespace, &state).await?;
                return Ok(state);
            }
            // The vendor's blockhash expired before the transaction landed.
            // The old idempotency window is dead; clear it and resubmit.
            Err(PaymentError::TransferDropped) => {
                state.external_idempotency = None;
                continue;
            }
            Err(e) => {
                if state.status == Status::Pending {
                    state.last_error = Some(PaymentErrorInfo { message: e.to_string(), temporary: e.temporary() });
                    persister::persist(ledger, signing_key, namespace, &state).await?;
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::{self, AUTHORIZATION_QUORUM};
    use crate::custodians::solana::{SolanaBackend, SolanaConfirmation, SolanaDriver, SolanaError};
    use crate::custodians::zebpay::{ZebpayAck, ZebpayBackend, ZebpayDriver, ZebpayError, ZebpayPollResult};
    use crate::ledger::InMemoryLedger;
    use crate::model::{PaymentDetails, IDEMPOTENCY_NAMESPACE};
    use rand_core::OsRng;
    use rust_decimal::Decimal;

    fn details() -> PaymentDetails {
        PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "acct-1".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "9.00".parse().unwrap(),
            custodian: "zebpay".into(),
            payout_id: "payout-runtime-1".into(),
            currency: "USD".into(),
            dry_run: None,
        }
    }

    async fn prepared_and_authorized(ledger: &InMemoryLedger, key: &SigningKey) -> Uuid {
        let state = AuthenticatedPaymentState::new(details());
        let document_id = state.document_id;
        persister::persist(ledger, key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        for n in 0..AUTHORIZATION_QUORUM {
            authorizer::authorize(ledger, key, &IDEMPOTENCY_NAMESPACE, document_id, &format!("auth-{n}"))
                .await
                .unwrap();
        }
        document_id
    }

    struct ImmediateSettleBackend;
    impl ZebpayBackend for ImmediateSettleBackend {
        async fn submit_transfer(
            &self,
            _api_key: &str,
            _signing_key: &str,
            _idempotency_key: &str,
            _to: &str,
            _amount: Decimal,
            _currency: &str,
        ) -> Result<ZebpayAck, ZebpayError> {
            Ok(ZebpayAck { reference: "ref-1".into(), settled: true })
        }
        async fn poll_transfer(&self, _api_key: &str, _reference: &str) -> Result<ZebpayPollResult, ZebpayError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn drive_is_a_no_op_for_a_prepared_payment() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let state = AuthenticatedPaymentState::new(details());
        let document_id = state.document_id;
        persister::persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();

        let driver = ZebpayDriver::new("k".into(), "s".into(), ImmediateSettleBackend);
        let err = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &driver, document_id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InsufficientAuthorizations));
    }

    #[tokio::test]
    async fn drive_advances_an_authorized_payment_to_paid() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let document_id = prepared_and_authorized(&ledger, &key).await;

        let driver = ZebpayDriver::new("k".into(), "s".into(), ImmediateSettleBackend);
        let state = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &driver, document_id).await.unwrap();
        assert_eq!(state.status, Status::Paid);

        let history = ledger.read_history(document_id).await;
        assert_eq!(history.len(), 4); // prepared, 2 authorizations, paid
    }

    struct AlwaysDropsBackend;
    impl SolanaBackend for AlwaysDropsBackend {
        async fn latest_blockhash(&self) -> Result<String, SolanaError> {
            Ok("bh".into())
        }
        async fn submit_transfer(&self, _k: &str, _b: &str, _to: &str, _amount: Decimal) -> Result<String, SolanaError> {
            Ok("sig".into())
        }
        async fn confirm(&self, _signature: &str) -> Result<SolanaConfirmation, SolanaError> {
            Ok(SolanaConfirmation::Dropped)
        }
    }

    #[tokio::test]
    async fn drive_clears_external_idempotency_and_retries_on_dropped_transfer() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut zebpay_details = details();
        zebpay_details.custodian = "solana".into();
        let state = AuthenticatedPaymentState::new(zebpay_details);
        let document_id = state.document_id;
        persister::persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        for n in 0..AUTHORIZATION_QUORUM {
            authorizer::authorize(&ledger, &key, &IDEMPOTENCY_NAMESPACE, document_id, &format!("auth-{n}"))
                .await
                .unwrap();
        }

        // First drive: no external idempotency window yet, so this submits
        // the transaction and parks at Pending without ever calling confirm().
        let driver = SolanaDriver::new("sol".into(), AlwaysDropsBackend);
        let state = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &driver, document_id).await.unwrap();
        assert_eq!(state.status, Status::Pending);
        assert!(state.external_idempotency.is_some());
    }

    struct DropsOnceThenConfirmsBackend {
        confirms_called: std::sync::atomic::AtomicU32,
    }
    impl SolanaBackend for DropsOnceThenConfirmsBackend {
        async fn latest_blockhash(&self) -> Result<String, SolanaError> {
            Ok("bh".into())
        }
        async fn submit_transfer(&self, _k: &str, _b: &str, _to: &str, _amount: Decimal) -> Result<String, SolanaError> {
            Ok("sig".into())
        }
        async fn confirm(&self, _signature: &str) -> Result<SolanaConfirmation, SolanaError> {
            let n = self.confirms_called.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                Ok(SolanaConfirmation::Dropped)
            } else {
                Ok(SolanaConfirmation::Confirmed)
            }
        }
    }

    #[tokio::test]
    async fn drive_retries_in_process_past_a_single_dropped_transaction() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut solana_details = details();
        solana_details.custodian = "solana".into();
        let state = AuthenticatedPaymentState::new(solana_details);
        let document_id = state.document_id;
        persister::persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        for n in 0..AUTHORIZATION_QUORUM {
            authorizer::authorize(&ledger, &key, &IDEMPOTENCY_NAMESPACE, document_id, &format!("auth-{n}"))
                .await
                .unwrap();
        }

        let first_driver = SolanaDriver::new("sol".into(), AlwaysDropsBackend);
        let state = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &first_driver, document_id).await.unwrap();
        assert_eq!(state.status, Status::Pending);

        // Second drive: confirm() reports Dropped once, so the in-flight
        // loop clears external_idempotency and resubmits — landing back at
        // Pending under a fresh signature, not yet confirmed.
        let retry_driver = SolanaDriver::new(
            "sol".into(),
            DropsOnceThenConfirmsBackend { confirms_called: std::sync::atomic::AtomicU32::new(0) },
        );
        let state = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &retry_driver, document_id).await.unwrap();
        assert_eq!(state.status, Status::Pending);

        // Third drive against the same backend instance: its confirm() now
        // reports Confirmed for the resubmitted signature.
        let state = drive(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &retry_driver, document_id).await.unwrap();
        assert_eq!(state.status, Status::Paid);
    }
}
