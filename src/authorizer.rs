//! Authorizer (spec.md §4.5): verifies an external authorizer's HTTP
//! signature against a known-keys allow-list, then idempotently records the
//! authorization and, once quorum is reached, advances `Prepared ->
//! Authorized`.

use ed25519_dalek::SigningKey;
use uuid::Uuid;

use crate::crypto;
use crate::error::PaymentError;
use crate::ledger::{self, Ledger};
use crate::model::{AuthenticatedPaymentState, Status};
use crate::persister;

/// Number of distinct authorizer signatures required to move a payment from
/// `Prepared` to `Authorized`.
pub const AUTHORIZATION_QUORUM: usize = 2;

/// Maps an authorizer's `keyId` to its ed25519 verifying key. Populated from
/// configuration at startup; kept as a small owned table rather than a
/// `HashMap` of trait objects since entries never change at runtime.
#[derive(Debug, Clone, Default)]
pub struct AuthorizerRegistry {
    entries: Vec<(String, [u8; 32])>,
}

impl AuthorizerRegistry {
    pub fn new(entries: Vec<(String, [u8; 32])>) -> Self {
        Self { entries }
    }

    pub fn lookup_verifier(&self, key_id: &str) -> Option<[u8; 32]> {
        self.entries.iter().find(|(id, _)| id == key_id).map(|(_, key)| *key)
    }
}

/// Builds the canonical string an authorizer signs over: method, path,
/// timestamp, and the hex SHA-256 of the request body, newline-joined.
pub fn canonical_signature_string(method: &str, path: &str, timestamp: &str, body: &[u8]) -> String {
    format!("{method}\n{path}\n{timestamp}\n{}", hex::encode(crypto::sha256(body)))
}

/// Verifies an authorizer's signature over `canonical` using the registry's
/// known public key for `key_id`. Unknown `key_id`s never verify.
pub fn verify_signature(registry: &AuthorizerRegistry, key_id: &str, canonical: &str, signature: &[u8]) -> bool {
    match registry.lookup_verifier(key_id) {
        Some(public_key) => crypto::verify(&public_key, canonical.as_bytes(), signature),
        None => false,
    }
}

/// Idempotently appends `key_id`'s authorization to the document, advances
/// `Prepared -> Authorized` once quorum is reached, and persists the
/// result. Returns the resulting (possibly unchanged) state.
pub async fn authorize<L: Ledger>(
    ledger: &L,
    signing_key: &SigningKey,
    namespace: &Uuid,
    document_id: Uuid,
    key_id: &str,
) -> Result<AuthenticatedPaymentState, PaymentError> {
    let latest = ledger::verify_history(ledger, document_id, namespace, signing_key.verifying_key().as_bytes())
        .await?
        .ok_or(PaymentError::InvalidAuthorizer)?;

    let mut state: AuthenticatedPaymentState = serde_json::from_slice(&latest.data.unsafe_payment_state)
        .map_err(|e| PaymentError::HistoryCorrupt(e.to_string()))?;

    if state.status.is_terminal() {
        return Err(PaymentError::InvalidTransition {
            from: format!("{:?}", state.status),
            to: "Authorized".into(),
        });
    }

    if !state.add_authorization(key_id) {
        return Ok(state);
    }

    if state.status == Status::Prepared && state.authorizations.len() >= AUTHORIZATION_QUORUM {
        state.status = Status::Authorized;
    }

    persister::persist(ledger, signing_key, namespace, &state).await?;
    Ok(state)
}
