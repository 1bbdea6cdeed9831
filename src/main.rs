mod attestation;
mod authorizer;
mod config;
mod crypto;
mod custodians;
mod error;
mod ledger;
mod model;
mod object_store;
mod persister;
mod routes;
mod runtime;
mod service;
mod share_store;
mod unsealer;
mod vault;

use std::sync::Arc;

use axum::http::{header, HeaderValue};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::attestation::{AttestationGate, LocalEnclaveIdentity, UnconfiguredKms};
use crate::config::EnclaveConfig;
use crate::ledger::InMemoryLedger;
use crate::model::IDEMPOTENCY_NAMESPACE;
use crate::object_store::InMemoryObjectStore;
use crate::routes::AppState;
use crate::service::{CustodianDrivers, Service};
use crate::vault::InMemoryVaultRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enclave_payout_core=info,tower_http=info".into()),
        )
        .init();

    let config = match EnclaveConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[enclave-payout] configuration error: {e}");
            std::process::exit(1);
        }
    };

    if config.allowed_origins.is_empty() {
        if cfg!(debug_assertions) {
            warn!("ENCLAVE_ALLOWED_ORIGINS not set — using permissive CORS (dev mode only)");
        } else {
            eprintln!("[enclave-payout] FATAL: ENCLAVE_ALLOWED_ORIGINS must be set in production builds");
            std::process::exit(1);
        }
    }
    if config.admin_keys.is_empty() {
        warn!("ENCLAVE_ADMIN_KEYS not set — vault admin routes are unreachable");
    }

    info!(
        host = %config.host,
        port = config.port,
        unseal_threshold = config.unseal_threshold,
        origins = config.allowed_origins.len(),
        "starting enclave payout executor"
    );

    let ledger = Arc::new(InMemoryLedger::new());
    let vault_registry = Arc::new(InMemoryVaultRegistry::new());
    let authorizers = Arc::new(authorizer::AuthorizerRegistry::new(Vec::new()));

    // The signing key is the enclave's own ed25519 identity, used to sign
    // every ledger revision. In production this is itself derived inside
    // the enclave from sealed material; deriving it fresh per process here
    // keeps this binary runnable standalone (spec.md §1, out-of-scope KMS).
    let signing_key = Arc::new(SigningKey::generate(&mut OsRng));

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let object_store = InMemoryObjectStore::new();
    let gate = Arc::new(AttestationGate::new(LocalEnclaveIdentity::new([0u8; 32])));
    let kms = UnconfiguredKms;

    let secrets = unsealer::run(
        &object_store,
        &*gate,
        &kms,
        &*vault_registry,
        &config.enclave_identity_vault_key,
        config.unseal_threshold,
        &config.enclave_secrets_object_name,
        std::time::Duration::from_secs(config.unseal_retry_secs),
        shutdown_rx,
    )
    .await;

    let secrets_loaded = secrets.is_ok();
    let (zebpay_api_key, zebpay_signing_key, solana_signing_key) = match secrets {
        Ok(secrets) => (
            secrets.zebpay_api_key.unwrap_or_default(),
            secrets.zebpay_signing_key.unwrap_or_default(),
            secrets.solana_signing_key.unwrap_or_default(),
        ),
        Err(e) => {
            warn!(error = %e, "unseal did not complete — payments will fail with SecretsNotLoaded until a restart unseals successfully");
            (
                config.zebpay_api_key.clone().unwrap_or_default(),
                config.zebpay_signing_key.clone().unwrap_or_default(),
                config.solana_signing_key.clone().unwrap_or_default(),
            )
        }
    };

    let custodians =
        Arc::new(CustodianDrivers::new(zebpay_api_key, zebpay_signing_key, solana_signing_key, secrets_loaded));

    let service = Service {
        ledger,
        vault_registry,
        authorizers,
        custodians,
        signing_key,
        namespace: IDEMPOTENCY_NAMESPACE,
        attestation_gate: gate,
    };

    let cors = if config.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = config.allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, "x-admin-key".parse().unwrap()])
    };

    let config = Arc::new(config);
    let state = AppState { service, config: config.clone() };

    let app = routes::router(state)
        .layer(RequestBodyLimitLayer::new(64 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")))
        .layer(SetResponseHeaderLayer::overriding(
            "Referrer-Policy".parse::<header::HeaderName>().unwrap(),
            HeaderValue::from_static("no-referrer"),
        ));

    let addr: std::net::SocketAddr = format!("{}:{}", config.host, config.port).parse().expect("invalid listen address");

    info!(addr = %addr, "enclave payout executor listening");

    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    info!("enclave payout executor shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
