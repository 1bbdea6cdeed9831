//! Share Store (spec.md §4.2): fetches operator shares of the enclave's
//! X25519 identity seed from object storage and decrypts each through the
//! Attestation Gate's KMS relay.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::attestation::{AttestationError, AttestationGate, EnclaveIdentity, FreshAttestation, KmsDecryptor};
use crate::object_store::{ObjectStore, ObjectStoreError};

#[derive(Debug)]
pub enum ShareStoreError {
    Object(ObjectStoreError),
    Attestation(AttestationError),
    Encoding(String),
}

impl std::fmt::Display for ShareStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareStoreError::Object(e) => write!(f, "object store error: {e}"),
            ShareStoreError::Attestation(e) => write!(f, "attestation error: {e}"),
            ShareStoreError::Encoding(msg) => write!(f, "share encoding error: {msg}"),
        }
    }
}
impl std::error::Error for ShareStoreError {}

impl From<ObjectStoreError> for ShareStoreError {
    fn from(e: ObjectStoreError) -> Self {
        ShareStoreError::Object(e)
    }
}
impl From<AttestationError> for ShareStoreError {
    fn from(e: AttestationError) -> Self {
        ShareStoreError::Attestation(e)
    }
}

/// Lists and decrypts every operator share stored under
/// `<hex(PCR2)>/operator-share*`, per spec.md §6 object layout. Each object
/// holds the raw KMS ciphertext of `base64(share)`: KMS first relays a
/// `CiphertextForRecipient` encrypted to the fresh ephemeral RSA key bound
/// into `fresh.document`, and RSA-OAEP-decrypting that recovers the base64
/// text, which is decoded last to get the raw share bytes.
pub async fn fetch_decrypted_shares<O, I, K>(
    store: &O,
    gate: &AttestationGate<I>,
    kms: &K,
    fresh: &FreshAttestation,
) -> Result<Vec<Vec<u8>>, ShareStoreError>
where
    O: ObjectStore,
    I: EnclaveIdentity,
    K: KmsDecryptor,
{
    let prefix = format!("{}/operator-share", hex::encode(gate_pcr2(gate)));
    let keys = store.list(&prefix).await?;

    let mut shares = Vec::with_capacity(keys.len());
    for key in keys {
        let ciphertext = store.get(&key).await?;

        let recipient_ciphertext = kms
            .kms_decrypt(&ciphertext, &fresh.document)
            .await
            .map_err(ShareStoreError::Attestation)?;
        let encoded_share = gate.decrypt_recipient_ciphertext(&fresh.rsa_private, &recipient_ciphertext)?;
        let share = STANDARD
            .decode(&encoded_share)
            .map_err(|e| ShareStoreError::Encoding(format!("{key}: not valid base64: {e}")))?;
        shares.push(share);
    }
    Ok(shares)
}

fn gate_pcr2<I: EnclaveIdentity>(gate: &AttestationGate<I>) -> [u8; 32] {
    gate.pcrs()[2]
}
