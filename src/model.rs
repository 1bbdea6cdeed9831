//! Core data model: payment details, authenticated state, ledger revisions,
//! vaults, and the custodian variant tag.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace used to derive idempotency keys via UUIDv5. Fixed so that the
/// same logical payment always maps to the same document id across restarts.
pub const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0xa4, 0x59, 0xea, 0x42, 0x5c, 0x50, 0x6c, 0x91, 0x3a, 0x00, 0xc0, 0x4f, 0xb6, 0x4c, 0x01,
]);

/// Namespace used to derive a vault's idempotency key.
pub const VAULT_NAMESPACE: Uuid = Uuid::from_bytes([
    0x9b, 0x9e, 0x3a, 0x1c, 0x2f, 0x3b, 0x4b, 0x7a, 0x8e, 0x1d, 0x5c, 0x6f, 0x7a, 0x8b, 0x9c, 0xad,
]);

/// Caller-supplied, immutable payout request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub idempotency_namespace: Uuid,
    pub to: String,
    pub from: String,
    pub amount: Decimal,
    pub custodian: String,
    pub payout_id: String,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<String>,
}

/// Fixed-field-order projection of the values that feed the idempotency
/// key. Field order is part of the canonical encoding, so this is a
/// dedicated struct rather than a `HashMap` — struct field order is
/// serialization order for `serde_json`.
#[derive(Serialize)]
struct CanonicalPaymentDetails<'a> {
    payout_id: &'a str,
    custodian: &'a str,
    amount: Decimal,
    to: &'a str,
    from: &'a str,
    currency: &'a str,
}

impl PaymentDetails {
    /// Deterministically derives `idempotencyKey = UUIDv5(namespace,
    /// canonical(details))`. Any change to `(payoutId, custodian, amount,
    /// to, from, currency)` invalidates the key.
    pub fn idempotency_key(&self) -> Uuid {
        self.idempotency_key_in_namespace(&self.idempotency_namespace)
    }

    /// Same derivation as `idempotency_key`, but against an explicit
    /// namespace rather than `self.idempotency_namespace` — used by the
    /// ledger history verifier, which pins the namespace it trusts rather
    /// than trusting whatever namespace a stored revision carries.
    pub fn idempotency_key_in_namespace(&self, namespace: &Uuid) -> Uuid {
        Self::idempotency_key_in(
            namespace,
            &self.payout_id,
            &self.custodian,
            self.amount,
            &self.to,
            &self.from,
            &self.currency,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn idempotency_key_in(
        namespace: &Uuid,
        payout_id: &str,
        custodian: &str,
        amount: Decimal,
        to: &str,
        from: &str,
        currency: &str,
    ) -> Uuid {
        let canonical = CanonicalPaymentDetails {
            payout_id,
            custodian,
            amount,
            to,
            from,
            currency,
        };
        let bytes = serde_json::to_vec(&canonical).expect("canonical payment details always serialize");
        Uuid::new_v5(namespace, &bytes)
    }
}

/// Payout lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Prepared,
    Authorized,
    Pending,
    Paid,
    Failed,
}

impl Status {
    /// `Transitions[cur]`: the set of states a write from `cur` may legally
    /// land on. `Pending -> Pending` is an explicit allowed self-loop.
    pub fn allowed_next(self) -> &'static [Status] {
        use Status::*;
        match self {
            Prepared => &[Authorized, Failed],
            Authorized => &[Pending, Paid, Failed],
            Pending => &[Pending, Paid, Failed],
            Paid => &[],
            Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Paid | Status::Failed)
    }

    pub fn next_state_valid(cur: Status, next: Status) -> bool {
        cur.allowed_next().contains(&next)
    }
}

/// A single `{keyId, documentId}` authorization accumulated during the
/// Authorized-signature quorum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub key_id: String,
    pub document_id: Uuid,
}

/// `{blockHash, signature}` window preserved across retries of an on-chain
/// submission so resubmission reuses the same vendor-idempotency window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdempotency {
    pub block_hash: String,
    pub signature: String,
}

/// A structured, classifiable error attached to `lastError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentErrorInfo {
    pub message: String,
    pub temporary: bool,
}

/// The canonical in-enclave record of a single payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedPaymentState {
    pub payment_details: PaymentDetails,
    pub status: Status,
    pub document_id: Uuid,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<PaymentErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_idempotency: Option<ExternalIdempotency>,
}

impl AuthenticatedPaymentState {
    pub fn new(payment_details: PaymentDetails) -> Self {
        let document_id = payment_details.idempotency_key();
        Self {
            payment_details,
            status: Status::Prepared,
            document_id,
            authorizations: Vec::new(),
            last_error: None,
            external_idempotency: None,
        }
    }

    /// Appends `{keyId, documentId}` iff not already present. Returns
    /// whether an authorization was actually added (idempotence check).
    pub fn add_authorization(&mut self, key_id: &str) -> bool {
        let already = self
            .authorizations
            .iter()
            .any(|a| a.key_id == key_id && a.document_id == self.document_id);
        if already {
            return false;
        }
        self.authorizations.push(Authorization {
            key_id: key_id.to_string(),
            document_id: self.document_id,
        });
        true
    }
}

/// Persisted form: the authenticated state plus the enclave signature over
/// its serialized bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentState {
    pub unsafe_payment_state: Vec<u8>,
    pub signature: Vec<u8>,
    pub signing_public_key: Vec<u8>,
}

/// Address of a revision within the ledger's internal log structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAddress {
    pub strand_id: u32,
    pub sequence_no: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub document_id: Uuid,
    pub version: u64,
    pub tx_time: u64,
    pub tx_id: String,
}

/// One entry in a document's tamper-evident revision history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRevision {
    pub block_address: BlockAddress,
    pub hash: Vec<u8>,
    pub data: PaymentState,
    pub metadata: RevisionMetadata,
}

/// A record binding a threshold, an operator set, and an X25519 recipient
/// public key used to encrypt configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    pub public_key: String,
    pub threshold: u32,
    pub operator_keys: Vec<String>,
    pub approvals: Vec<String>,
    pub creator: String,
    pub idempotency_key: String,
}

impl Vault {
    /// The vault is "approved" iff it carries at least two distinct
    /// approvals — hard-coded per spec.md §9 Open Questions, not derived
    /// from `threshold`.
    pub const APPROVAL_QUORUM: usize = 2;

    pub fn is_approved(&self) -> bool {
        self.approvals.len() >= Self::APPROVAL_QUORUM
    }

    /// Sorts and dedups operator keys before hashing so the idempotency key
    /// is stable under operator-set reordering.
    pub fn idempotency_key_for(threshold: u32, operator_keys: &[String], public_key: &str) -> String {
        let mut sorted: Vec<&str> = operator_keys.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let joined = sorted.join(",");
        let material = format!("{threshold},{joined}{public_key}");
        uuid::Uuid::new_v5(&VAULT_NAMESPACE, material.as_bytes()).to_string()
    }
}

/// A Solana on-chain signing address bound to a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainAddress {
    pub chain: String,
    pub public_key: String,
    pub creator: String,
    pub approvals: Vec<String>,
}

impl ChainAddress {
    pub fn is_usable(&self) -> bool {
        self.approvals.len() >= Vault::APPROVAL_QUORUM
    }
}

/// Tagged custodian variant. See spec.md §9 Design Notes: expressed as a
/// finite enum rather than an inheritance chain; dry-run behavior is a
/// closure wrapping a successful base driver (`custodians::dryrun`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Custodian {
    Uphold,
    Bitflyer,
    Gemini,
    Zebpay,
    Solana,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunKind {
    Prepare,
    Submit,
}

impl Custodian {
    /// Parses the custodian field of `PaymentDetails`, recognizing the
    /// literal dry-run custodian name from scenario S5.
    pub fn parse(raw: &str) -> Option<Custodian> {
        match raw {
            "uphold" => Some(Custodian::Uphold),
            "bitflyer" => Some(Custodian::Bitflyer),
            "gemini" => Some(Custodian::Gemini),
            "zebpay" => Some(Custodian::Zebpay),
            "solana" => Some(Custodian::Solana),
            "dryrun-prepare-fails" => Some(Custodian::Zebpay),
            _ => None,
        }
    }
}

/// "should dry-run" predicate: `dryRun` is set and names a recognized
/// stage for the current status. Per spec.md §9, any other combination —
/// including a `dryRun` value outside `{"prepare","submit"}` — is treated
/// as "no dry-run".
pub fn dry_run_kind(state: &AuthenticatedPaymentState) -> Option<DryRunKind> {
    let raw = state.payment_details.dry_run.as_deref()?;
    match (raw, state.status) {
        ("prepare", Status::Prepared) => Some(DryRunKind::Prepare),
        ("submit", Status::Authorized) | ("submit", Status::Pending) => Some(DryRunKind::Submit),
        _ => None,
    }
}
