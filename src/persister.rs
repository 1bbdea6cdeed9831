//! State Persister (spec.md §4.4): the only path by which an
//! `AuthenticatedPaymentState` is signed and written to the ledger. Verifies
//! the existing history, checks the requested transition is legal, and
//! retries on optimistic-concurrency contention with the teacher's
//! `bridge.rs` exponential-backoff shape.

use std::time::Duration;
use uuid::Uuid;

use ed25519_dalek::SigningKey;

use crate::crypto;
use crate::error::PaymentError;
use crate::ledger::{self, Ledger, LedgerError};
use crate::model::{AuthenticatedPaymentState, LedgerRevision, PaymentState, Status};

const MAX_APPEND_RETRIES: u32 = 2;
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(20);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(4);

/// Signs `state` and appends it to `ledger`, retrying on contention.
/// `state.document_id` must already be set; callers mutate a working copy
/// of the record and call this once the desired next status is decided.
pub async fn persist<L: Ledger>(
    ledger: &L,
    signing_key: &SigningKey,
    namespace: &Uuid,
    state: &AuthenticatedPaymentState,
) -> Result<LedgerRevision, PaymentError> {
    let verifying_key = signing_key.verifying_key();
    let mut expected_base = verify_transition(ledger, namespace, verifying_key.as_bytes(), state).await?;

    let payment_state = sign_state(signing_key, state);

    for attempt in 0..=MAX_APPEND_RETRIES {
        match ledger.append(state.document_id, expected_base, payment_state.clone()).await {
            Ok(revision) => return Ok(revision),
            Err(LedgerError::Contention) if attempt < MAX_APPEND_RETRIES => {
                expected_base = verify_transition(ledger, namespace, verifying_key.as_bytes(), state).await?;
                tokio::time::sleep(backoff_for(attempt)).await;
            }
            Err(LedgerError::Contention) => return Err(PaymentError::LedgerContention),
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("loop either returns or exhausts retries above")
}

fn backoff_for(attempt: u32) -> Duration {
    let scaled = RETRY_BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt));
    scaled.min(RETRY_BACKOFF_CAP)
}

fn sign_state(signing_key: &SigningKey, state: &AuthenticatedPaymentState) -> PaymentState {
    let bytes = serde_json::to_vec(state).expect("authenticated payment state always serializes");
    let signature = crypto::sign(signing_key, &bytes);
    PaymentState {
        unsafe_payment_state: bytes,
        signature,
        signing_public_key: signing_key.verifying_key().as_bytes().to_vec(),
    }
}

/// Verifies the document's existing history (if any) and that `state`'s
/// status is a legal move from the latest recorded status. Returns the
/// `expected_base_version` to append against.
async fn verify_transition<L: Ledger>(
    ledger: &L,
    namespace: &Uuid,
    signer_public_key: &[u8],
    state: &AuthenticatedPaymentState,
) -> Result<Option<u64>, PaymentError> {
    match ledger::verify_history(ledger, state.document_id, namespace, signer_public_key).await? {
        None => {
            if state.status != Status::Prepared {
                return Err(PaymentError::InvalidTransition {
                    from: "<none>".into(),
                    to: format!("{:?}", state.status),
                });
            }
            Ok(None)
        }
        Some(latest) => {
            let decoded: AuthenticatedPaymentState = serde_json::from_slice(&latest.data.unsafe_payment_state)
                .map_err(|e| PaymentError::HistoryCorrupt(e.to_string()))?;
            if !Status::next_state_valid(decoded.status, state.status) {
                return Err(PaymentError::InvalidTransition {
                    from: format!("{:?}", decoded.status),
                    to: format!("{:?}", state.status),
                });
            }
            Ok(Some(latest.metadata.version))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::model::{PaymentDetails, IDEMPOTENCY_NAMESPACE};
    use rand_core::OsRng;

    fn details() -> PaymentDetails {
        PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "512".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "2.5".parse().unwrap(),
            custodian: "zebpay".into(),
            payout_id: "payout-42".into(),
            currency: "USD".into(),
            dry_run: None,
        }
    }

    #[tokio::test]
    async fn persist_writes_the_first_prepared_revision() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let state = AuthenticatedPaymentState::new(details());

        let revision = persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        assert_eq!(revision.metadata.version, 1);
    }

    #[tokio::test]
    async fn persist_rejects_illegal_first_transition() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut state = AuthenticatedPaymentState::new(details());
        state.status = Status::Paid;

        let err = persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn persist_chains_legal_transitions() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut state = AuthenticatedPaymentState::new(details());
        persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();

        state.status = Status::Authorized;
        let revision = persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        assert_eq!(revision.metadata.version, 2);
    }

    #[tokio::test]
    async fn persist_rejects_an_illegal_follow_on_transition() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut state = AuthenticatedPaymentState::new(details());
        persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();

        state.status = Status::Paid; // Prepared -> Paid is illegal
        let err = persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn persist_allows_the_pending_self_loop() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let mut state = AuthenticatedPaymentState::new(details());
        persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        state.status = Status::Authorized;
        persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        state.status = Status::Pending;
        persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();

        let revision = persist(&ledger, &key, &IDEMPOTENCY_NAMESPACE, &state).await.unwrap();
        assert_eq!(revision.metadata.version, 4);
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_for(0), Duration::from_millis(20));
        assert_eq!(backoff_for(10), RETRY_BACKOFF_CAP);
    }
}
