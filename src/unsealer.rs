//! Unsealer (spec.md §4.2): combines operator shares into the enclave's
//! X25519 identity, confirms the identity's vault has reached approval
//! quorum, and age-decrypts the secrets blob that carries custodian
//! credentials. Runs once at startup as a single in-flight task and retries
//! on a fixed interval until unsealed or cancelled.

use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use bech32::ToBase32;
use serde::Deserialize;
use tokio::sync::watch;

use crate::attestation::{AttestationError, AttestationGate, EnclaveIdentity, KmsDecryptor};
use crate::crypto::shamir::{self, ShamirError};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::share_store::{self, ShareStoreError};
use crate::vault::VaultRegistry;

const AGE_SECRET_KEY_HRP: &str = "age-secret-key-";

#[derive(Debug)]
pub enum UnsealError {
    Share(ShareStoreError),
    Attestation(AttestationError),
    Object(ObjectStoreError),
    Shamir(ShamirError),
    Age(String),
    MalformedSeed,
    VaultNotApproved,
    Cancelled,
}

impl std::fmt::Display for UnsealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnsealError::Share(e) => write!(f, "share store error: {e}"),
            UnsealError::Attestation(e) => write!(f, "attestation error: {e}"),
            UnsealError::Object(e) => write!(f, "object store error: {e}"),
            UnsealError::Shamir(e) => write!(f, "shamir error: {e}"),
            UnsealError::Age(msg) => write!(f, "age decryption error: {msg}"),
            UnsealError::MalformedSeed => write!(f, "combined shares did not yield a 32-byte seed"),
            UnsealError::VaultNotApproved => write!(f, "vault has not reached approval quorum"),
            UnsealError::Cancelled => write!(f, "unseal cancelled"),
        }
    }
}
impl std::error::Error for UnsealError {}

impl From<ShareStoreError> for UnsealError {
    fn from(e: ShareStoreError) -> Self {
        UnsealError::Share(e)
    }
}
impl From<AttestationError> for UnsealError {
    fn from(e: AttestationError) -> Self {
        UnsealError::Attestation(e)
    }
}
impl From<ObjectStoreError> for UnsealError {
    fn from(e: ObjectStoreError) -> Self {
        UnsealError::Object(e)
    }
}
impl From<ShamirError> for UnsealError {
    fn from(e: ShamirError) -> Self {
        UnsealError::Shamir(e)
    }
}

/// Custodian credentials recovered from the age-encrypted secrets blob.
#[derive(Debug, Clone, Deserialize)]
pub struct UnsealedSecrets {
    #[serde(default)]
    pub zebpay_api_key: Option<String>,
    #[serde(default)]
    pub zebpay_signing_key: Option<String>,
    #[serde(default)]
    pub solana_rpc_endpoint: Option<String>,
    #[serde(default)]
    pub solana_signing_key: Option<String>,
}

/// Encodes a 32-byte X25519 scalar into age's `AGE-SECRET-KEY-1...` Bech32
/// identity string, then parses it back through `age::x25519::Identity`'s
/// own `FromStr` — the only public constructor the crate exposes.
fn identity_from_seed(seed: &[u8; 32]) -> Result<age::x25519::Identity, UnsealError> {
    let encoded = bech32::encode(AGE_SECRET_KEY_HRP, seed.to_base32(), bech32::Variant::Bech32)
        .map_err(|e| UnsealError::Age(format!("bech32 encode failed: {e}")))?;
    age::x25519::Identity::from_str(&encoded.to_uppercase())
        .map_err(|e| UnsealError::Age(format!("not a valid x25519 identity: {e}")))
}

fn decrypt_age_blob(identity: &age::x25519::Identity, ciphertext: &[u8]) -> Result<Vec<u8>, UnsealError> {
    let decryptor =
        age::Decryptor::new(ciphertext).map_err(|e| UnsealError::Age(format!("malformed ciphertext: {e}")))?;
    let mut reader = decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(|e| UnsealError::Age(format!("no matching recipient stanza: {e}")))?;
    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| UnsealError::Age(format!("decrypt stream error: {e}")))?;
    Ok(plaintext)
}

/// Runs the unseal protocol to completion: retries fetching and combining
/// operator shares, and waiting for vault approval, every `retry_interval`
/// until both conditions hold or `shutdown` signals true.
#[allow(clippy::too_many_arguments)]
pub async fn run<O, I, K, V>(
    store: &O,
    gate: &AttestationGate<I>,
    kms: &K,
    vault_registry: &V,
    vault_idempotency_key: &str,
    threshold: usize,
    secrets_object_key: &str,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<UnsealedSecrets, UnsealError>
where
    O: ObjectStore,
    I: EnclaveIdentity,
    K: KmsDecryptor,
    V: VaultRegistry,
{
    let fresh = gate.attest_fresh()?;

    // Step 1 (spec.md §4.2): retry fetching+combining shares every interval
    // until the threshold is met. Bounded only by process lifetime / cancel.
    let identity = loop {
        let shares = share_store::fetch_decrypted_shares(store, gate, kms, &fresh).await?;
        if shares.len() >= threshold {
            let seed_bytes = shamir::combine(threshold as u8, &shares[..threshold])?;
            let seed: [u8; 32] = seed_bytes
                .as_slice()
                .try_into()
                .map_err(|_| UnsealError::MalformedSeed)?;
            break identity_from_seed(&seed)?;
        }
        tracing::warn!(have = shares.len(), need = threshold, "insufficient operator shares");
        wait_or_cancel(retry_interval, &mut shutdown).await?;
    };

    // Step 3: one-shot approval check. Unlike share-fetching, this does not
    // retry — an unapproved or mismatched vault aborts the unseal outright,
    // discarding the reconstructed identity.
    let recipient = identity.to_public().to_string();
    match vault_registry.get_vault(vault_idempotency_key).await {
        Some(vault) if vault.is_approved() && vault.public_key == recipient => {}
        _ => {
            tracing::warn!(vault_idempotency_key, "vault unapproved or recipient mismatch, aborting unseal");
            return Err(UnsealError::VaultNotApproved);
        }
    }

    let ciphertext = loop {
        match store.get(secrets_object_key).await {
            Ok(blob) => break blob,
            Err(ObjectStoreError::NotFound(_)) => {
                tracing::warn!(secrets_object_key, "secrets object not yet published");
            }
            Err(e) => return Err(e.into()),
        }
        wait_or_cancel(retry_interval, &mut shutdown).await?;
    };

    let plaintext = decrypt_age_blob(&identity, &ciphertext)?;
    serde_json::from_slice(&plaintext).map_err(|e| UnsealError::Age(format!("malformed secrets payload: {e}")))
}

async fn wait_or_cancel(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> Result<(), UnsealError> {
    tokio::select! {
        _ = tokio::time::sleep(interval) => Ok(()),
        result = shutdown.changed() => {
            if result.is_err() || *shutdown.borrow() {
                Err(UnsealError::Cancelled)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::LocalEnclaveIdentity;
    use crate::object_store::InMemoryObjectStore;
    use crate::vault::InMemoryVaultRegistry;
    use age::Encryptor;
    use base64::{engine::general_purpose::STANDARD, Engine};

    struct PassthroughKms;
    impl KmsDecryptor for PassthroughKms {
        async fn kms_decrypt(
            &self,
            ciphertext: &[u8],
            _attestation_document: &[u8],
        ) -> Result<Vec<u8>, AttestationError> {
            Ok(ciphertext.to_vec())
        }
    }

    async fn seed_shares(store: &InMemoryObjectStore, gate: &AttestationGate<LocalEnclaveIdentity>, seed: &[u8; 32]) {
        let fresh = gate.attest_fresh().unwrap();
        let public = rsa::RsaPublicKey::from(&fresh.rsa_private);
        let shares = shamir::split(seed, 2, 3).unwrap();
        let prefix = hex::encode(gate.pcrs()[2]);
        for (i, share) in shares.iter().enumerate() {
            let encoded = STANDARD.encode(share);
            let padding = rsa::Oaep::new::<sha2::Sha256>();
            let ciphertext = public.encrypt(&mut rand::thread_rng(), padding, encoded.as_bytes()).unwrap();
            store.put(&format!("{prefix}/operator-share-{i}"), ciphertext).await.unwrap();
        }
    }

    #[tokio::test]
    async fn identity_from_seed_roundtrips_its_public_key() {
        let seed = [42u8; 32];
        let identity = identity_from_seed(&seed).unwrap();
        let identity_again = identity_from_seed(&seed).unwrap();
        assert_eq!(identity.to_public().to_string(), identity_again.to_public().to_string());
    }

    #[tokio::test]
    async fn run_unseals_once_shares_vault_and_secrets_are_all_available() {
        let store = InMemoryObjectStore::new();
        let gate = AttestationGate::new(LocalEnclaveIdentity::new([3u8; 32]));
        let registry = InMemoryVaultRegistry::new();
        let kms = PassthroughKms;

        let seed = [7u8; 32];
        seed_shares(&store, &gate, &seed).await;
        let identity = identity_from_seed(&seed).unwrap();
        let recipient = identity.to_public();

        let vault = registry
            .create_vault(2, vec!["op-a".into(), "op-b".into()], recipient.to_string(), "op-a".into())
            .await
            .unwrap();
        registry.approve_vault(&vault.idempotency_key, "op-b").await.unwrap();

        let secrets = UnsealedSecrets {
            zebpay_api_key: Some("key-123".into()),
            zebpay_signing_key: None,
            solana_rpc_endpoint: None,
            solana_signing_key: None,
        };
        let plaintext = serde_json::to_vec(&serde_json::json!({
            "zebpay_api_key": secrets.zebpay_api_key,
        }))
        .unwrap();

        let encryptor = Encryptor::with_recipients(vec![Box::new(recipient)]).expect("at least one recipient");
        let mut ciphertext = Vec::new();
        let mut writer = encryptor.wrap_output(&mut ciphertext).unwrap();
        std::io::Write::write_all(&mut writer, &plaintext).unwrap();
        writer.finish().unwrap();
        store.put("secrets.age", ciphertext).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let unsealed = run(
            &store,
            &gate,
            &kms,
            &registry,
            &vault.idempotency_key,
            2,
            "secrets.age",
            Duration::from_millis(5),
            rx,
        )
        .await
        .unwrap();
        assert_eq!(unsealed.zebpay_api_key.as_deref(), Some("key-123"));
    }

    #[tokio::test]
    async fn run_aborts_with_vault_not_approved_when_quorum_is_short() {
        let store = InMemoryObjectStore::new();
        let gate = AttestationGate::new(LocalEnclaveIdentity::new([5u8; 32]));
        let registry = InMemoryVaultRegistry::new();
        let kms = PassthroughKms;

        let seed = [8u8; 32];
        seed_shares(&store, &gate, &seed).await;
        let identity = identity_from_seed(&seed).unwrap();
        let recipient = identity.to_public();

        // Single approval (the creator's own) falls short of the 2-approval
        // quorum, so the vault is never approved.
        let vault = registry
            .create_vault(2, vec!["op-a".into(), "op-b".into()], recipient.to_string(), "op-a".into())
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        let err = run(
            &store,
            &gate,
            &kms,
            &registry,
            &vault.idempotency_key,
            2,
            "secrets.age",
            Duration::from_millis(5),
            rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UnsealError::VaultNotApproved));
    }

    #[tokio::test]
    async fn run_is_cancellable_while_waiting_for_shares() {
        let store = InMemoryObjectStore::new();
        let gate = AttestationGate::new(LocalEnclaveIdentity::new([4u8; 32]));
        let registry = InMemoryVaultRegistry::new();
        let kms = PassthroughKms;

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = run(
            &store,
            &gate,
            &kms,
            &registry,
            "missing-vault",
            2,
            "secrets.age",
            Duration::from_millis(5),
            rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UnsealError::Cancelled));
    }
}
