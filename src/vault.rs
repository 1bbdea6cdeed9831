//! Vault Registry (spec.md §4.3 / §5): records of which operator set and
//! approval threshold back a given X25519 (or chain) recipient key, used to
//! gate the Unsealer and custodian signing-address usage.

use dashmap::DashMap;

use crate::model::{ChainAddress, Vault};

#[derive(Debug, PartialEq)]
pub enum VaultError {
    NotFound(String),
    UnknownOperator(String),
    InvalidThreshold { threshold: u32, operators: usize },
}

impl std::fmt::Display for VaultError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultError::NotFound(key) => write!(f, "vault not found: {key}"),
            VaultError::UnknownOperator(key) => write!(f, "operator not a member of this vault: {key}"),
            VaultError::InvalidThreshold { threshold, operators } => {
                write!(f, "threshold {threshold} invalid for {operators} operator(s)")
            }
        }
    }
}
impl std::error::Error for VaultError {}

pub trait VaultRegistry: Send + Sync + 'static {
    /// Fails per spec.md §4.3 if `threshold < 1` or `operator_keys.len() <
    /// threshold`. A newly created vault is persisted with `approvals =
    /// [creator]`, the creator's own implicit approval.
    fn create_vault(
        &self,
        threshold: u32,
        operator_keys: Vec<String>,
        public_key: String,
        creator: String,
    ) -> impl std::future::Future<Output = Result<Vault, VaultError>> + Send;

    fn approve_vault(
        &self,
        idempotency_key: &str,
        operator_key: &str,
    ) -> impl std::future::Future<Output = Result<Vault, VaultError>> + Send;

    fn get_vault(&self, idempotency_key: &str) -> impl std::future::Future<Output = Option<Vault>> + Send;

    fn create_chain_address(
        &self,
        chain: String,
        public_key: String,
        creator: String,
    ) -> impl std::future::Future<Output = ChainAddress> + Send;

    fn approve_chain_address(
        &self,
        public_key: &str,
        operator_key: &str,
    ) -> impl std::future::Future<Output = Result<ChainAddress, VaultError>> + Send;
}

/// `DashMap`-backed in-memory registry, grounded on the teacher's
/// `store.rs` `InMemoryStore`.
#[derive(Default)]
pub struct InMemoryVaultRegistry {
    vaults: DashMap<String, Vault>,
    chain_addresses: DashMap<String, ChainAddress>,
}

impl InMemoryVaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultRegistry for InMemoryVaultRegistry {
    async fn create_vault(
        &self,
        threshold: u32,
        operator_keys: Vec<String>,
        public_key: String,
        creator: String,
    ) -> Result<Vault, VaultError> {
        if threshold < 1 || operator_keys.len() < threshold as usize {
            return Err(VaultError::InvalidThreshold { threshold, operators: operator_keys.len() });
        }
        let idempotency_key = Vault::idempotency_key_for(threshold, &operator_keys, &public_key);
        let vault = self
            .vaults
            .entry(idempotency_key.clone())
            .or_insert_with(|| Vault {
                public_key,
                threshold,
                operator_keys,
                approvals: vec![creator.clone()],
                creator,
                idempotency_key,
            })
            .clone();
        Ok(vault)
    }

    async fn approve_vault(&self, idempotency_key: &str, operator_key: &str) -> Result<Vault, VaultError> {
        let mut vault = self
            .vaults
            .get_mut(idempotency_key)
            .ok_or_else(|| VaultError::NotFound(idempotency_key.to_string()))?;
        if !vault.operator_keys.iter().any(|k| k == operator_key) {
            return Err(VaultError::UnknownOperator(operator_key.to_string()));
        }
        if !vault.approvals.iter().any(|k| k == operator_key) {
            vault.approvals.push(operator_key.to_string());
        }
        Ok(vault.clone())
    }

    async fn get_vault(&self, idempotency_key: &str) -> Option<Vault> {
        self.vaults.get(idempotency_key).map(|v| v.clone())
    }

    async fn create_chain_address(&self, chain: String, public_key: String, creator: String) -> ChainAddress {
        self.chain_addresses
            .entry(public_key.clone())
            .or_insert_with(|| ChainAddress {
                chain,
                public_key,
                creator,
                approvals: Vec::new(),
            })
            .clone()
    }

    async fn approve_chain_address(&self, public_key: &str, operator_key: &str) -> Result<ChainAddress, VaultError> {
        let mut address = self
            .chain_addresses
            .get_mut(public_key)
            .ok_or_else(|| VaultError::NotFound(public_key.to_string()))?;
        if !address.approvals.iter().any(|k| k == operator_key) {
            address.approvals.push(operator_key.to_string());
        }
        Ok(address.clone())
    }
}
