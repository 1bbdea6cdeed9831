//! HTTP surface (spec.md §6), wired the way the teacher's `routes.rs` wires
//! `AppState` + typed request/response bodies + one handler per route.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authorizer;
use crate::config::EnclaveConfig;
use crate::error::{AppError, PaymentError};
use crate::ledger::{self, Ledger};
use crate::model::{AuthenticatedPaymentState, Custodian, PaymentDetails, Status};
use crate::persister;
use crate::runtime;
use crate::service::Service;
use crate::vault::VaultRegistry;

#[derive(Clone)]
pub struct AppState {
    pub service: Service,
    pub config: std::sync::Arc<EnclaveConfig>,
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PrepareRequest {
    pub to: String,
    pub from: String,
    pub amount: Decimal,
    pub custodian: String,
    pub payout_id: String,
    pub currency: String,
    #[serde(default)]
    pub dry_run: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrepareResponse {
    pub document_id: Uuid,
    pub status: Status,
}

/// `GET /v1/payments/config`: a fresh attestation document over a random
/// nonce and the enclave signer's public key, so a caller can confirm it is
/// talking to the expected enclave image before trusting any response.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub attestation: String,
    pub public_key: String,
}

pub async fn payments_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let mut nonce = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut nonce);
    let public_key = state.service.signing_key.verifying_key().to_bytes();
    let document = state.service.attestation_gate.attest(&nonce, None, Some(&public_key));
    Json(ConfigResponse { attestation: STANDARD.encode(document), public_key: hex::encode(public_key) })
}

/// `POST /v1/payments/prepare`: validates the request, constructs the
/// initial `Prepared` record, and persists it — idempotently, since the
/// document id is a pure function of the request body. The response carries
/// `X-Nitro-Attestation: base64(attestation(nonce, body))` per spec.md §6.
pub async fn prepare(
    State(state): State<AppState>,
    Json(req): Json<PrepareRequest>,
) -> Result<(HeaderMap, Json<PrepareResponse>), AppError> {
    if Custodian::parse(&req.custodian).is_none() {
        return Err(AppError::BadRequest(format!("unknown custodian: {}", req.custodian)));
    }
    if req.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }

    let body = serde_json::to_vec(&req).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let mut nonce = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut nonce);
    let document = state.service.attestation_gate.attest(&nonce, Some(&body), None);

    let details = PaymentDetails {
        idempotency_namespace: state.service.namespace,
        to: req.to,
        from: req.from,
        amount: req.amount,
        custodian: req.custodian,
        payout_id: req.payout_id,
        currency: req.currency,
        dry_run: req.dry_run,
    };
    let document_id = details.idempotency_key();

    let already_exists = ledger::verify_history(
        &*state.service.ledger,
        document_id,
        &state.service.namespace,
        state.service.signing_key.verifying_key().as_bytes(),
    )
    .await?
    .is_some();

    if !already_exists {
        let record = AuthenticatedPaymentState::new(details);
        persister::persist(&*state.service.ledger, &state.service.signing_key, &state.service.namespace, &record)
            .await?;
    }

    let mut headers = HeaderMap::new();
    let encoded = STANDARD.encode(document);
    headers.insert(
        "X-Nitro-Attestation",
        HeaderValue::from_str(&encoded).map_err(|e| AppError::Internal(e.to_string()))?,
    );

    Ok((headers, Json(PrepareResponse { document_id, status: Status::Prepared })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub document_id: Uuid,
    pub key_id: String,
    pub timestamp: String,
    pub signature_hex: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub document_id: Uuid,
    pub status: Status,
}

/// `POST /v1/payments/submit`: an authorizer attests to a prepared payment.
/// Per spec.md §7, insufficient authorizations after this call is reported
/// as a 200 no-op, not an error — the caller cannot distinguish "added one
/// of two needed signatures" from any other successful call.
pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let method = "POST";
    let path = "/v1/payments/submit";
    let body = serde_json::to_vec(&req).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let canonical = authorizer::canonical_signature_string(method, path, &req.timestamp, &body);

    let signature =
        hex::decode(&req.signature_hex).map_err(|_| AppError::BadRequest("signature_hex is not valid hex".into()))?;

    if !authorizer::verify_signature(&state.service.authorizers, &req.key_id, &canonical, &signature) {
        return Err(PaymentError::InvalidAuthorizer.into());
    }

    let record = authorizer::authorize(
        &*state.service.ledger,
        &state.service.signing_key,
        &state.service.namespace,
        req.document_id,
        &req.key_id,
    )
    .await?;

    if record.status == Status::Authorized {
        let custodian = Custodian::parse(&record.payment_details.custodian).ok_or(PaymentError::InvalidAuthorizer)?;
        let handle = DriverHandle { custodian, drivers: &state.service.custodians };
        match runtime::drive(
            &*state.service.ledger,
            &state.service.signing_key,
            &state.service.namespace,
            &handle,
            record.document_id,
        )
        .await
        {
            Ok(driven) => return Ok(Json(SubmitResponse { document_id: driven.document_id, status: driven.status })),
            Err(PaymentError::InsufficientAuthorizations) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(SubmitResponse { document_id: record.document_id, status: record.status }))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub document_id: Uuid,
    pub status: Status,
    pub last_error: Option<crate::model::PaymentErrorInfo>,
}

/// `GET /v1/payments/status/{documentId}`.
pub async fn status(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let latest = ledger::verify_history(
        &*state.service.ledger,
        document_id,
        &state.service.namespace,
        state.service.signing_key.verifying_key().as_bytes(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("no payment with document id {document_id}")))?;

    let record: AuthenticatedPaymentState = serde_json::from_slice(&latest.data.unsafe_payment_state)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(StatusResponse { document_id, status: record.status, last_error: record.last_error }))
}

#[derive(Debug, Deserialize)]
pub struct CreateVaultRequest {
    pub threshold: u32,
    pub operator_keys: Vec<String>,
    pub public_key: String,
    pub creator: String,
}

#[derive(Debug, Serialize)]
pub struct VaultResponse {
    pub idempotency_key: String,
    pub approvals: usize,
    pub approved: bool,
}

/// `POST /v1/vault`, admin-only.
pub async fn create_vault(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateVaultRequest>,
) -> Result<Json<VaultResponse>, AppError> {
    require_admin(&state.config, &headers)?;
    let vault = state
        .service
        .vault_registry
        .create_vault(req.threshold, req.operator_keys, req.public_key, req.creator)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(VaultResponse {
        idempotency_key: vault.idempotency_key,
        approvals: vault.approvals.len(),
        approved: vault.is_approved(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ApproveVaultRequest {
    pub operator_key: String,
}

/// `POST /v1/vault/{idempotencyKey}/approve`, admin-only.
pub async fn approve_vault(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(idempotency_key): Path<String>,
    Json(req): Json<ApproveVaultRequest>,
) -> Result<Json<VaultResponse>, AppError> {
    require_admin(&state.config, &headers)?;
    let vault = state
        .service
        .vault_registry
        .approve_vault(&idempotency_key, &req.operator_key)
        .await
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    Ok(Json(VaultResponse {
        idempotency_key: vault.idempotency_key,
        approvals: vault.approvals.len(),
        approved: vault.is_approved(),
    }))
}

fn require_admin(config: &EnclaveConfig, headers: &HeaderMap) -> Result<(), AppError> {
    let key = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if config.is_admin_key_valid(key, &config.admin_keys) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Adapts a `Custodian` + the shared driver set into a `CustodianDriver`, so
/// `runtime::drive` can stay generic over a single driver type per call.
struct DriverHandle<'a> {
    custodian: Custodian,
    drivers: &'a crate::service::CustodianDrivers,
}

impl<'a> crate::custodians::CustodianDriver for DriverHandle<'a> {
    async fn pay(
        &self,
        state: &AuthenticatedPaymentState,
    ) -> Result<crate::custodians::DriveOutcome, PaymentError> {
        self.drivers.pay(self.custodian, state).await
    }

    async fn fail(&self, state: &AuthenticatedPaymentState, reason: &str) -> crate::custodians::DriveOutcome {
        self.drivers.fail(self.custodian, state, reason).await
    }
}

pub fn router(state: AppState) -> axum::Router {
    use axum::routing::{get, post};
    axum::Router::new()
        .route("/v1/healthz", get(health))
        .route("/v1/payments/config", get(payments_config))
        .route("/v1/payments/prepare", post(prepare))
        .route("/v1/payments/submit", post(submit))
        .route("/v1/payments/status/:document_id", get(status))
        .route("/v1/vault", post(create_vault))
        .route("/v1/vault/:idempotency_key/approve", post(approve_vault))
        .with_state(state)
}
