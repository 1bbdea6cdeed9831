//! Error types. `PaymentError` is the domain error propagated through the
//! state machine and ledger; `AppError` is the HTTP-facing wrapper, shaped
//! after the teacher crate's `error.rs` (sanitized public message + machine
//! code, full detail logged server-side only).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Domain error kinds from spec.md §7. Each propagates distinctly; none are
/// silently downgraded.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentError {
    InvalidAuthorizer,
    InsufficientAuthorizations,
    InvalidTransition { from: String, to: String },
    HistoryCorrupt(String),
    LedgerContention,
    UnapprovedKey,
    SecretsNotLoaded,
    TransferDropped,
    TransferFailed(String),
    DeadlineExceeded,
    /// Any uncategorized error encountered during `Drive`, wrapped so the
    /// next attempt can retry.
    Temporary(String),
}

impl PaymentError {
    /// Whether this error is expected to clear itself on a subsequent
    /// `drive()` attempt.
    pub fn temporary(&self) -> bool {
        matches!(
            self,
            PaymentError::LedgerContention
                | PaymentError::SecretsNotLoaded
                | PaymentError::TransferDropped
                | PaymentError::DeadlineExceeded
                | PaymentError::Temporary(_)
        )
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentError::InvalidAuthorizer => write!(f, "authorizer key id not recognized"),
            PaymentError::InsufficientAuthorizations => write!(f, "insufficient authorizations"),
            PaymentError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            PaymentError::HistoryCorrupt(msg) => write!(f, "history corrupt: {msg}"),
            PaymentError::LedgerContention => write!(f, "ledger optimistic-concurrency conflict"),
            PaymentError::UnapprovedKey => write!(f, "key is not an approved vault public key"),
            PaymentError::SecretsNotLoaded => write!(f, "enclave secrets not yet loaded"),
            PaymentError::TransferDropped => write!(f, "on-chain transfer dropped (blockhash expired)"),
            PaymentError::TransferFailed(msg) => write!(f, "transfer failed: {msg}"),
            PaymentError::DeadlineExceeded => write!(f, "drive deadline exceeded"),
            PaymentError::Temporary(msg) => write!(f, "temporary error: {msg}"),
        }
    }
}

impl std::error::Error for PaymentError {}

/// HTTP-facing error. Wraps `PaymentError` where a domain error reaches an
/// HTTP boundary, plus request-shape errors that never reach the domain.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Payment(PaymentError),
    Internal(String),
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        AppError::Payment(e)
    }
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Payment(e) => match e {
                PaymentError::InvalidAuthorizer => StatusCode::BAD_REQUEST,
                PaymentError::InsufficientAuthorizations => StatusCode::OK,
                PaymentError::SecretsNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
                PaymentError::LedgerContention => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Payment(PaymentError::InvalidAuthorizer) => "INVALID_AUTHORIZER",
            AppError::Payment(PaymentError::InsufficientAuthorizations) => "INSUFFICIENT_AUTHORIZATIONS",
            AppError::Payment(PaymentError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            AppError::Payment(PaymentError::HistoryCorrupt(_)) => "HISTORY_CORRUPT",
            AppError::Payment(PaymentError::LedgerContention) => "LEDGER_CONTENTION",
            AppError::Payment(PaymentError::UnapprovedKey) => "UNAPPROVED_KEY",
            AppError::Payment(PaymentError::SecretsNotLoaded) => "SECRETS_NOT_LOADED",
            AppError::Payment(PaymentError::TransferDropped) => "TRANSFER_DROPPED",
            AppError::Payment(PaymentError::TransferFailed(_)) => "TRANSFER_FAILED",
            AppError::Payment(PaymentError::DeadlineExceeded) => "DEADLINE_EXCEEDED",
            AppError::Payment(PaymentError::Temporary(_)) => "TEMPORARY",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Unauthorized => "unauthorized".into(),
            AppError::NotFound(msg) => msg.clone(),
            // InsufficientAuthorizations is surfaced as success per spec.md §7:
            // "Logged at debug; state NOT advanced; returned success to caller."
            AppError::Payment(PaymentError::InsufficientAuthorizations) => {
                "nothing to do: insufficient authorizations".into()
            }
            AppError::Payment(e) => e.to_string(),
            AppError::Internal(_) => "internal error".into(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            AppError::Unauthorized => write!(f, "unauthorized"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::Payment(e) => write!(f, "payment error: {e}"),
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(_)
            | AppError::Payment(PaymentError::HistoryCorrupt(_))
            | AppError::Payment(PaymentError::InvalidTransition { .. }) => {
                error!(error = %self, "request failed");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = json!({
            "error": self.public_message(),
            "code": self.error_code(),
        });
        (status, axum::Json(body)).into_response()
    }
}
