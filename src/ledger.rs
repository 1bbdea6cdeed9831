//! Ledger transport (out-of-scope per spec.md §1, reduced to the `Ledger`
//! trait) and the Ledger History Verifier (spec.md §4.4): for a document
//! id, fetch the full revision history, verify signatures, idempotency-key
//! continuity, legal transitions, and the latest hash against the ledger's
//! Merkle digest.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use uuid::Uuid;

use crate::crypto;
use crate::error::PaymentError;
use crate::model::{
    AuthenticatedPaymentState, BlockAddress, LedgerRevision, PaymentState, RevisionMetadata, Status,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Optimistic-concurrency collision on append.
    Contention,
    Backend(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Contention => write!(f, "ledger optimistic-concurrency conflict"),
            LedgerError::Backend(msg) => write!(f, "ledger backend error: {msg}"),
        }
    }
}
impl std::error::Error for LedgerError {}

impl From<LedgerError> for PaymentError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Contention => PaymentError::LedgerContention,
            LedgerError::Backend(msg) => PaymentError::Temporary(msg),
        }
    }
}

/// Table `transactions`, rows `{documentId, state}`, queried as
/// `SELECT * FROM history(transactions) WHERE metadata.id = ?` per
/// spec.md §6. Out-of-scope transport reduced to a trait.
pub trait Ledger: Send + Sync + 'static {
    fn read_history(
        &self,
        document_id: Uuid,
    ) -> impl std::future::Future<Output = Vec<LedgerRevision>> + Send;

    /// Appends a new revision iff the document's current latest version
    /// equals `expected_base_version` (`None` meaning "no revision yet").
    fn append(
        &self,
        document_id: Uuid,
        expected_base_version: Option<u64>,
        state: PaymentState,
    ) -> impl std::future::Future<Output = Result<LedgerRevision, LedgerError>> + Send;

    fn current_digest(&self) -> impl std::future::Future<Output = [u8; 32]> + Send;

    fn merkle_proof(
        &self,
        document_id: Uuid,
        version: u64,
    ) -> impl std::future::Future<Output = Option<Vec<[u8; 32]>>> + Send;
}

/// In-memory, `DashMap`-backed `Ledger`, grounded on the teacher's
/// `store.rs` `InMemoryStore`. The Merkle digest is a running fold over the
/// global commit-order sequence of revision hashes.
#[derive(Default)]
pub struct InMemoryLedger {
    documents: DashMap<Uuid, Vec<LedgerRevision>>,
    leaves: Mutex<Vec<[u8; 32]>>,
    leaf_index: DashMap<(Uuid, u64), usize>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold_leaves(leaves: &[[u8; 32]]) -> [u8; 32] {
        let mut iter = leaves.iter();
        let Some(first) = iter.next() else {
            return [0u8; 32];
        };
        let mut digest = *first;
        for leaf in iter {
            digest = crypto::fold_merkle_step(&digest, leaf);
        }
        digest
    }
}

impl Ledger for InMemoryLedger {
    async fn read_history(&self, document_id: Uuid) -> Vec<LedgerRevision> {
        self.documents
            .get(&document_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    async fn append(
        &self,
        document_id: Uuid,
        expected_base_version: Option<u64>,
        state: PaymentState,
    ) -> Result<LedgerRevision, LedgerError> {
        let mut entry = self.documents.entry(document_id).or_default();
        let current_latest = entry.last().map(|r| r.metadata.version).unwrap_or(0);
        if current_latest != expected_base_version.unwrap_or(0) {
            return Err(LedgerError::Contention);
        }

        let version = current_latest + 1;
        let leaf_hash = crypto::sha256(&canonical_revision_bytes(&state));

        let idx = {
            let mut leaves = self.leaves.lock().expect("leaves mutex poisoned");
            let idx = leaves.len();
            leaves.push(leaf_hash);
            idx
        };
        self.leaf_index.insert((document_id, version), idx);

        let tx_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let revision = LedgerRevision {
            block_address: BlockAddress {
                strand_id: 0,
                sequence_no: idx as u64,
            },
            hash: leaf_hash.to_vec(),
            data: state,
            metadata: RevisionMetadata {
                document_id,
                version,
                tx_time,
                tx_id: Uuid::new_v4().to_string(),
            },
        };
        entry.push(revision.clone());
        Ok(revision)
    }

    async fn current_digest(&self) -> [u8; 32] {
        let leaves = self.leaves.lock().expect("leaves mutex poisoned");
        Self::fold_leaves(&leaves)
    }

    async fn merkle_proof(&self, document_id: Uuid, version: u64) -> Option<Vec<[u8; 32]>> {
        let idx = *self.leaf_index.get(&(document_id, version))?;
        let leaves = self.leaves.lock().expect("leaves mutex poisoned");
        // `fold_leaves` folds strictly left-to-right starting from leaves[0],
        // so a proof for leaves[idx] must first collapse everything before it
        // into that same running digest (`fold_merkle_step` is symmetric, so
        // folding leaf_hash against this prefix reproduces the step the
        // original computation took at position idx), then continue through
        // whatever comes after.
        let mut proof = Vec::with_capacity(leaves.len().saturating_sub(idx));
        if idx > 0 {
            proof.push(Self::fold_leaves(&leaves[..idx]));
        }
        proof.extend_from_slice(&leaves[idx + 1..]);
        Some(proof)
    }
}

fn canonical_revision_bytes(state: &PaymentState) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(state.signature.len() + state.unsafe_payment_state.len());
    bytes.extend_from_slice(&state.signature);
    bytes.extend_from_slice(&state.unsafe_payment_state);
    bytes
}

/// Verifies the full revision history of `document_id` per spec.md §4.4 and
/// returns the latest revision on success. `signer_public_key` is the
/// enclave's current attested signer (spec.md §3 `PaymentState` invariant).
pub async fn verify_history<L: Ledger>(
    ledger: &L,
    document_id: Uuid,
    namespace: &Uuid,
    signer_public_key: &[u8],
) -> Result<Option<LedgerRevision>, PaymentError> {
    let history = ledger.read_history(document_id).await;
    if history.is_empty() {
        return Ok(None);
    }

    let mut prev_status: Option<Status> = None;
    let mut prev_key: Option<Uuid> = None;
    let mut latest: Option<&LedgerRevision> = None;

    for (i, revision) in history.iter().enumerate() {
        let decoded: AuthenticatedPaymentState =
            serde_json::from_slice(&revision.data.unsafe_payment_state).map_err(|e| {
                PaymentError::HistoryCorrupt(format!("revision {i}: undecodable state: {e}"))
            })?;

        let recomputed_key = decoded.payment_details.idempotency_key_in_namespace(namespace);
        if recomputed_key != document_id {
            return Err(PaymentError::HistoryCorrupt(format!(
                "revision {i}: idempotency key {recomputed_key} does not match document id {document_id}"
            )));
        }

        if revision.data.signing_public_key != signer_public_key {
            return Err(PaymentError::HistoryCorrupt(format!(
                "revision {i}: signed by an unexpected key"
            )));
        }
        if !crypto::verify(
            &revision.data.signing_public_key,
            &revision.data.unsafe_payment_state,
            &revision.data.signature,
        ) {
            return Err(PaymentError::HistoryCorrupt(format!(
                "revision {i}: signature does not verify"
            )));
        }

        if i == 0 {
            if decoded.status != Status::Prepared {
                return Err(PaymentError::HistoryCorrupt(
                    "first revision is not Prepared".into(),
                ));
            }
        } else {
            let from = prev_status.expect("prev_status set after first iteration");
            if !Status::next_state_valid(from, decoded.status) {
                return Err(PaymentError::HistoryCorrupt(format!(
                    "revision {i}: illegal transition {from:?} -> {:?}",
                    decoded.status
                )));
            }
            if prev_key != Some(recomputed_key) {
                return Err(PaymentError::HistoryCorrupt(format!(
                    "revision {i}: idempotency key discontinuity"
                )));
            }
        }

        prev_status = Some(decoded.status);
        prev_key = Some(recomputed_key);
        latest = Some(revision);
    }

    let latest = latest.expect("history non-empty implies a latest revision");

    let proof = ledger
        .merkle_proof(document_id, latest.metadata.version)
        .await
        .ok_or_else(|| PaymentError::HistoryCorrupt("latest revision missing from ledger index".into()))?;
    let digest = ledger.current_digest().await;
    let leaf_hash: [u8; 32] = latest
        .hash
        .as_slice()
        .try_into()
        .map_err(|_| PaymentError::HistoryCorrupt("malformed leaf hash".into()))?;

    if !crypto::verify_merkle_proof(&leaf_hash, &proof, &digest) {
        return Err(PaymentError::HistoryCorrupt(
            "latest revision hash does not fold to the ledger digest".into(),
        ));
    }

    Ok(Some(latest.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PaymentDetails, IDEMPOTENCY_NAMESPACE};
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    fn details() -> PaymentDetails {
        PaymentDetails {
            idempotency_namespace: IDEMPOTENCY_NAMESPACE,
            to: "512".into(),
            from: "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa".into(),
            amount: "1.1".parse().unwrap(),
            custodian: "zebpay".into(),
            payout_id: "payout-1".into(),
            currency: "USD".into(),
            dry_run: None,
        }
    }

    fn sign_state(key: &SigningKey, state: &AuthenticatedPaymentState) -> PaymentState {
        let bytes = serde_json::to_vec(state).unwrap();
        let signature = crypto::sign(key, &bytes);
        PaymentState {
            unsafe_payment_state: bytes,
            signature,
            signing_public_key: key.verifying_key().as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn verify_history_accepts_a_legal_chain() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let pk = key.verifying_key().as_bytes().to_vec();

        let mut state = AuthenticatedPaymentState::new(details());
        let doc_id = state.document_id;
        let persisted = sign_state(&key, &state);
        ledger.append(doc_id, None, persisted).await.unwrap();

        state.status = Status::Authorized;
        let persisted = sign_state(&key, &state);
        ledger.append(doc_id, Some(1), persisted).await.unwrap();

        let result = verify_history(&ledger, doc_id, &IDEMPOTENCY_NAMESPACE, &pk)
            .await
            .unwrap();
        let latest = result.unwrap();
        assert_eq!(latest.metadata.version, 2);
    }

    #[tokio::test]
    async fn verify_history_rejects_tampered_signature() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let pk = key.verifying_key().as_bytes().to_vec();

        let state = AuthenticatedPaymentState::new(details());
        let doc_id = state.document_id;
        let mut persisted = sign_state(&key, &state);
        persisted.signature[0] ^= 0xFF;
        ledger.append(doc_id, None, persisted).await.unwrap();

        let err = verify_history(&ledger, doc_id, &IDEMPOTENCY_NAMESPACE, &pk)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::HistoryCorrupt(_)));
    }

    #[tokio::test]
    async fn verify_history_rejects_non_initial_prepared() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let pk = key.verifying_key().as_bytes().to_vec();

        let mut state = AuthenticatedPaymentState::new(details());
        state.status = Status::Authorized; // first revision must be Prepared
        let doc_id = state.document_id;
        let persisted = sign_state(&key, &state);
        ledger.append(doc_id, None, persisted).await.unwrap();

        let err = verify_history(&ledger, doc_id, &IDEMPOTENCY_NAMESPACE, &pk)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::HistoryCorrupt(_)));
    }

    #[tokio::test]
    async fn verify_history_rejects_illegal_transition() {
        let ledger = InMemoryLedger::new();
        let key = SigningKey::generate(&mut OsRng);
        let pk = key.verifying_key().as_bytes().to_vec();

        let mut state = AuthenticatedPaymentState::new(details());
        let doc_id = state.document_id;
        let persisted = sign_state(&key, &state);
        ledger.append(doc_id, None, persisted).await.unwrap();

        state.status = Status::Pending; // Prepared -> Pending is illegal
        let persisted = sign_state(&key, &state);
        ledger.append(doc_id, Some(1), persisted).await.unwrap();

        let err = verify_history(&ledger, doc_id, &IDEMPOTENCY_NAMESPACE, &pk)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::HistoryCorrupt(_)));
    }

    #[tokio::test]
    async fn verify_history_empty_returns_not_found() {
        let ledger = InMemoryLedger::new();
        let result = verify_history(&ledger, Uuid::new_v4(), &IDEMPOTENCY_NAMESPACE, &[0u8; 32])
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
