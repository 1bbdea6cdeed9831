//! Service aggregate (spec.md §9 Design Notes, "ownership"): the shared,
//! reference-counted collaborators every request handler needs. Built once
//! at startup after the Unsealer completes and cloned cheaply into each
//! request task, following the teacher's `AppState` in `routes.rs`.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use uuid::Uuid;

use crate::attestation::{AttestationGate, LocalEnclaveIdentity};
use crate::authorizer::AuthorizerRegistry;
use crate::custodians::bitflyer::BitflyerDriver;
use crate::custodians::dryrun::DryRunDriver;
use crate::custodians::generic::{PollResult, SubmitAck, VendorBackend, VendorError};
use crate::custodians::gemini::GeminiDriver;
use crate::custodians::solana::{SolanaBackend, SolanaConfirmation, SolanaDriver, SolanaError};
use crate::custodians::uphold::UpholdDriver;
use crate::custodians::zebpay::{ZebpayAck, ZebpayBackend, ZebpayDriver, ZebpayError, ZebpayPollResult};
use crate::custodians::{CustodianDriver, DriveOutcome};
use crate::error::PaymentError;
use crate::ledger::InMemoryLedger;
use crate::model::{AuthenticatedPaymentState, Custodian};
use crate::vault::InMemoryVaultRegistry;

/// Vendor transport placeholder for custodians whose real network
/// integration hasn't been wired into this deployment yet. Every call fails
/// temporary so the runtime retries rather than marking a payment Failed
/// for want of configuration.
#[derive(Clone, Copy, Default)]
pub struct UnconfiguredBackend;

impl VendorBackend for UnconfiguredBackend {
    async fn submit(
        &self,
        _idempotency_key: &str,
        _to: &str,
        _amount: rust_decimal::Decimal,
        _currency: &str,
    ) -> Result<SubmitAck, VendorError> {
        Err(VendorError::Temporary("custodian backend not configured".into()))
    }

    async fn poll(&self, _block_hash: &str) -> Result<PollResult, VendorError> {
        Err(VendorError::Temporary("custodian backend not configured".into()))
    }

    async fn cancel(&self, _block_hash: &str) {}
}

impl ZebpayBackend for UnconfiguredBackend {
    async fn submit_transfer(
        &self,
        _api_key: &str,
        _signing_key: &str,
        _idempotency_key: &str,
        _to: &str,
        _amount: rust_decimal::Decimal,
        _currency: &str,
    ) -> Result<ZebpayAck, ZebpayError> {
        Err(ZebpayError::Temporary("zebpay backend not configured".into()))
    }

    async fn poll_transfer(&self, _api_key: &str, _reference: &str) -> Result<ZebpayPollResult, ZebpayError> {
        Err(ZebpayError::Temporary("zebpay backend not configured".into()))
    }
}

impl SolanaBackend for UnconfiguredBackend {
    async fn latest_blockhash(&self) -> Result<String, SolanaError> {
        Err(SolanaError::Temporary("solana backend not configured".into()))
    }

    async fn submit_transfer(
        &self,
        _signing_key: &str,
        _blockhash: &str,
        _to: &str,
        _amount: rust_decimal::Decimal,
    ) -> Result<String, SolanaError> {
        Err(SolanaError::Temporary("solana backend not configured".into()))
    }

    async fn confirm(&self, _signature: &str) -> Result<SolanaConfirmation, SolanaError> {
        Err(SolanaError::Temporary("solana backend not configured".into()))
    }
}

/// One concrete driver per custodian rail, each optionally dry-run wrapped.
/// Dispatch is a match on `Custodian` rather than a trait object, since the
/// drivers' `async fn`s aren't dyn-compatible (spec.md §9 Design Notes).
pub struct CustodianDrivers {
    pub uphold: DryRunDriver<UpholdDriver<UnconfiguredBackend>>,
    pub bitflyer: DryRunDriver<BitflyerDriver<UnconfiguredBackend>>,
    pub gemini: DryRunDriver<GeminiDriver<UnconfiguredBackend>>,
    pub zebpay: DryRunDriver<ZebpayDriver<UnconfiguredBackend>>,
    pub solana: DryRunDriver<SolanaDriver<UnconfiguredBackend>>,
    /// Whether the Unsealer installed a secrets map. `false` until a
    /// successful unseal (or an operator-supplied dev fallback) completes;
    /// per spec.md §7/§8 S6, every `pay()` fails `SecretsNotLoaded` until
    /// then rather than silently dispatching with absent credentials.
    secrets_loaded: bool,
}

impl CustodianDrivers {
    pub fn new(
        zebpay_api_key: String,
        zebpay_signing_key: String,
        solana_signing_key: String,
        secrets_loaded: bool,
    ) -> Self {
        Self {
            uphold: DryRunDriver::new(UpholdDriver::new(UnconfiguredBackend)),
            bitflyer: DryRunDriver::new(BitflyerDriver::new(UnconfiguredBackend)),
            gemini: DryRunDriver::new(GeminiDriver::new(UnconfiguredBackend)),
            zebpay: DryRunDriver::new(ZebpayDriver::new(zebpay_api_key, zebpay_signing_key, UnconfiguredBackend)),
            solana: DryRunDriver::new(SolanaDriver::new(solana_signing_key, UnconfiguredBackend)),
            secrets_loaded,
        }
    }

    pub async fn pay(&self, custodian: Custodian, state: &AuthenticatedPaymentState) -> Result<DriveOutcome, PaymentError> {
        if !self.secrets_loaded {
            return Err(PaymentError::SecretsNotLoaded);
        }
        match custodian {
            Custodian::Uphold => self.uphold.pay(state).await,
            Custodian::Bitflyer => self.bitflyer.pay(state).await,
            Custodian::Gemini => self.gemini.pay(state).await,
            Custodian::Zebpay => self.zebpay.pay(state).await,
            Custodian::Solana => self.solana.pay(state).await,
        }
    }

    pub async fn fail(&self, custodian: Custodian, state: &AuthenticatedPaymentState, reason: &str) -> DriveOutcome {
        match custodian {
            Custodian::Uphold => self.uphold.fail(state, reason).await,
            Custodian::Bitflyer => self.bitflyer.fail(state, reason).await,
            Custodian::Gemini => self.gemini.fail(state, reason).await,
            Custodian::Zebpay => self.zebpay.fail(state, reason).await,
            Custodian::Solana => self.solana.fail(state, reason).await,
        }
    }
}

/// Everything a request handler needs, shared by reference across tasks.
#[derive(Clone)]
pub struct Service {
    pub ledger: Arc<InMemoryLedger>,
    pub vault_registry: Arc<InMemoryVaultRegistry>,
    pub authorizers: Arc<AuthorizerRegistry>,
    pub custodians: Arc<CustodianDrivers>,
    pub signing_key: Arc<SigningKey>,
    pub namespace: Uuid,
    pub attestation_gate: Arc<AttestationGate<LocalEnclaveIdentity>>,
}
