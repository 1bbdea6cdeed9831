//! Cryptographic primitives used across the enclave core: ed25519 signing
//! for enclave-signed state and HTTP-signature verification, SHA-256 for the
//! Merkle fold, and the Shamir combine used by the Unsealer.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Signs `message` with the enclave's ed25519 signing key.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Vec<u8> {
    signing_key.sign(message).to_bytes().to_vec()
}

/// Verifies `signature` over `message` under `public_key`. Any malformed
/// input is treated as a verification failure, never a panic.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &signature).is_ok()
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Folds one Merkle proof step: `SHA256(max(a,b) || min(a,b))`, comparing
/// the two 32-byte buffers lexicographically and placing the larger first,
/// exactly as spec.md §4.4 step 5 describes.
pub fn fold_merkle_step(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(hi);
    hasher.update(lo);
    hasher.finalize().into()
}

/// Recomputes the leaf-to-root hash for a Merkle audit proof and compares it
/// to the expected digest (spec.md §4.4 step 5, P4).
pub fn verify_merkle_proof(leaf_hash: &[u8; 32], proof: &[[u8; 32]], expected_digest: &[u8; 32]) -> bool {
    let mut current = *leaf_hash;
    for step in proof {
        current = fold_merkle_step(&current, step);
    }
    &current == expected_digest
}

/// Shamir-combines `shares` into the original secret bytes. Thin wrapper
/// around `sharks::Sharks` so callers work with raw byte shares rather than
/// the crate's own share type.
pub mod shamir {
    use sharks::{Share, Sharks};

    #[derive(Debug)]
    pub struct ShamirError(pub String);

    impl std::fmt::Display for ShamirError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "shamir error: {}", self.0)
        }
    }
    impl std::error::Error for ShamirError {}

    /// Splits `secret` into `n` shares with recovery threshold `k`.
    pub fn split(secret: &[u8], k: u8, n: u8) -> Result<Vec<Vec<u8>>, ShamirError> {
        let sharks = Sharks(k);
        let dealer = sharks.dealer(secret);
        Ok(dealer.take(n as usize).map(|s| Vec::from(&s)).collect())
    }

    /// Combines `shares` (each a byte-encoded `Share`) back into the secret.
    /// Requires at least the configured threshold of shares to succeed.
    pub fn combine(k: u8, shares: &[Vec<u8>]) -> Result<Vec<u8>, ShamirError> {
        let sharks = Sharks(k);
        let parsed: Result<Vec<Share>, _> = shares
            .iter()
            .map(|s| Share::try_from(s.as_slice()))
            .collect();
        let parsed = parsed.map_err(|e| ShamirError(format!("{e:?}")))?;
        sharks
            .recover(parsed.as_slice())
            .map_err(|e| ShamirError(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    #[test]
    fn sign_then_verify_roundtrip() {
        let key = SigningKey::generate(&mut OsRng);
        let msg = b"hello enclave";
        let sig = sign(&key, msg);
        assert!(verify(key.verifying_key().as_bytes(), msg, &sig));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let msg = b"hello enclave";
        let mut sig = sign(&key, msg);
        sig[0] ^= 0xFF;
        assert!(!verify(key.verifying_key().as_bytes(), msg, &sig));
    }

    #[test]
    fn merkle_fold_orders_lexicographically() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_eq!(fold_merkle_step(&a, &b), fold_merkle_step(&b, &a));
    }

    #[test]
    fn merkle_proof_verifies_against_recomputed_digest() {
        let leaf = sha256(b"revision-1");
        let proof = vec![sha256(b"sibling-a"), sha256(b"sibling-b")];
        let mut expected = leaf;
        for step in &proof {
            expected = fold_merkle_step(&expected, step);
        }
        assert!(verify_merkle_proof(&leaf, &proof, &expected));

        let mut wrong_digest = expected;
        wrong_digest[0] ^= 1;
        assert!(!verify_merkle_proof(&leaf, &proof, &wrong_digest));
    }

    #[test]
    fn shamir_combine_recovers_secret_from_threshold_shares() {
        let secret = b"x25519-identity-seed-bytes-32!!!".to_vec();
        let shares = shamir::split(&secret, 2, 3).unwrap();
        let recovered = shamir::combine(2, &shares[0..2]).unwrap();
        assert_eq!(recovered, secret);
    }
}
