//! Attestation Gate (spec.md §4.1). Produces attestation documents binding
//! an ephemeral RSA public key and relays KMS decrypts that only succeed
//! under a policy keyed to the enclave's PCRs.
//!
//! `attest()` and `pcrs()` are the out-of-scope primitives named in
//! spec.md §1; here they're a trait (`EnclaveIdentity`) so tests can supply
//! deterministic attestation bytes without a real Nitro/SEV stack.

use rand::RngCore;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Binds a nonce (and optional user data / public key) to the enclave's
/// measured state. Out-of-scope collaborator per spec.md §1.
pub trait EnclaveIdentity: Send + Sync {
    fn attest(&self, nonce: &[u8; 64], user_data: Option<&[u8]>, public_key: Option<&[u8]>) -> Vec<u8>;
    /// PCR0..PCR8, enclave measurement registers. PCR2 uniquely identifies
    /// the enclave image and scopes the operator-share object prefix.
    fn pcrs(&self) -> [[u8; 32]; 9];
}

/// KMS decrypt restricted to callers holding a valid attestation document.
/// Out-of-scope transport per spec.md §1.
pub trait KmsDecryptor: Send + Sync {
    fn kms_decrypt(
        &self,
        ciphertext: &[u8],
        attestation_document: &[u8],
    ) -> impl std::future::Future<Output = Result<Vec<u8>, AttestationError>> + Send;
}

#[derive(Debug)]
pub enum AttestationError {
    Rsa(String),
    Kms(String),
}

impl std::fmt::Display for AttestationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttestationError::Rsa(msg) => write!(f, "rsa error: {msg}"),
            AttestationError::Kms(msg) => write!(f, "kms error: {msg}"),
        }
    }
}
impl std::error::Error for AttestationError {}

/// A fresh ephemeral RSA keypair bound into an attestation document, per
/// spec.md §4.1 `attestFresh()`.
pub struct FreshAttestation {
    pub rsa_private: RsaPrivateKey,
    pub document: Vec<u8>,
}

pub struct AttestationGate<I: EnclaveIdentity> {
    identity: I,
}

impl<I: EnclaveIdentity> AttestationGate<I> {
    pub fn new(identity: I) -> Self {
        Self { identity }
    }

    pub fn pcrs(&self) -> [[u8; 32]; 9] {
        self.identity.pcrs()
    }

    /// Produces an attestation document over a caller-supplied nonce and
    /// optional user data / public key, without generating an ephemeral RSA
    /// keypair — used by the HTTP surface (spec.md §6 `GET /v1/payments/config`,
    /// the `X-Nitro-Attestation` response header) rather than the KMS relay.
    pub fn attest(&self, nonce: &[u8; 64], user_data: Option<&[u8]>, public_key: Option<&[u8]>) -> Vec<u8> {
        self.identity.attest(nonce, user_data, public_key)
    }

    /// Generates a 2048-bit RSA keypair, a 64-byte random nonce, and
    /// produces `document = attest(nonce, userData=None, publicKey=DER(pub))`.
    pub fn attest_fresh(&self) -> Result<FreshAttestation, AttestationError> {
        let mut rng = rand::thread_rng();
        let rsa_private = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| AttestationError::Rsa(e.to_string()))?;
        let public_der = RsaPublicKey::from(&rsa_private)
            .to_public_key_der()
            .map_err(|e| AttestationError::Rsa(e.to_string()))?;

        let mut nonce = [0u8; 64];
        rng.fill_bytes(&mut nonce);

        let document = self
            .identity
            .attest(&nonce, None, Some(public_der.as_bytes()));

        Ok(FreshAttestation {
            rsa_private,
            document,
        })
    }

    /// Decrypts `CiphertextForRecipient` returned by KMS using the fresh
    /// RSA private key, per spec.md §4.1 `kmsDecrypt()`.
    pub fn decrypt_recipient_ciphertext(
        &self,
        rsa_private: &RsaPrivateKey,
        recipient_ciphertext: &[u8],
    ) -> Result<Vec<u8>, AttestationError> {
        let padding = Oaep::new::<Sha256>();
        rsa_private
            .decrypt(padding, recipient_ciphertext)
            .map_err(|e| AttestationError::Rsa(e.to_string()))
    }
}

/// Deterministic, non-attested identity used for tests and local runs: the
/// "attestation document" is just a concatenation of its inputs, and PCRs
/// are fixed zero buffers.
pub struct LocalEnclaveIdentity {
    pub pcr2: [u8; 32],
}

impl LocalEnclaveIdentity {
    pub fn new(pcr2: [u8; 32]) -> Self {
        Self { pcr2 }
    }
}

impl EnclaveIdentity for LocalEnclaveIdentity {
    fn attest(&self, nonce: &[u8; 64], user_data: Option<&[u8]>, public_key: Option<&[u8]>) -> Vec<u8> {
        let mut doc = Vec::with_capacity(64 + 64);
        doc.extend_from_slice(nonce);
        if let Some(ud) = user_data {
            doc.extend_from_slice(ud);
        }
        if let Some(pk) = public_key {
            doc.extend_from_slice(pk);
        }
        doc
    }

    fn pcrs(&self) -> [[u8; 32]; 9] {
        let mut pcrs = [[0u8; 32]; 9];
        pcrs[2] = self.pcr2;
        pcrs
    }
}

/// KMS transport placeholder: the real AWS KMS `Decrypt` call, restricted by
/// key policy to callers presenting a valid attestation document, is an
/// out-of-scope external collaborator (spec.md §1). Every call fails so the
/// unsealer's retry loop runs against a real KMS endpoint only once one is
/// wired in for a given deployment.
#[derive(Clone, Copy, Default)]
pub struct UnconfiguredKms;

impl KmsDecryptor for UnconfiguredKms {
    async fn kms_decrypt(&self, _ciphertext: &[u8], _attestation_document: &[u8]) -> Result<Vec<u8>, AttestationError> {
        Err(AttestationError::Kms("kms transport not configured".into()))
    }
}
