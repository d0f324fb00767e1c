use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

/// Why the ledger declined a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("data already verified")]
    AlreadyVerified,

    #[error("record id already exists")]
    DuplicateId,

    #[error("invalid input proof")]
    InvalidInputProof,

    #[error("invalid decryption proof")]
    InvalidDecryptionProof,

    #[error("malformed clear values: {0}")]
    MalformedClearValues(String),

    #[error("ciphertext already stored under another record")]
    DuplicateCiphertext,
}

/// Failure kinds of the submission and decryption workflow.
#[derive(Debug, Clone, Error)]
pub enum ReportError {
    #[error("no authenticated identity connected")]
    NotAuthenticated,

    #[error("confidential computation service not initialized")]
    EncryptionUnavailable,

    #[error("plaintext {0} is outside the 32-bit range")]
    InvalidPlaintext(i64),

    #[error("ledger unreachable: {0}")]
    LedgerUnreachable(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("rejected: {0}")]
    Rejected(Rejection),

    #[error("data already verified")]
    AlreadyVerified,

    #[error("decryption proof rejected: {0}")]
    ProofRejected(String),

    #[error("confidential computation failed: {0}")]
    ComputeFailed(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error")]
    Internal,
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        let msg = e.to_string();
        match e {
            ReportError::NotAuthenticated => ApiError::Unauthorized(msg),
            ReportError::InvalidPlaintext(_) => ApiError::BadRequest(msg),
            ReportError::RecordNotFound(_) => ApiError::NotFound(msg),
            ReportError::Rejected(_) | ReportError::AlreadyVerified => ApiError::Conflict(msg),
            ReportError::ProofRejected(_) | ReportError::ComputeFailed(_) => ApiError::Unprocessable(msg),
            ReportError::EncryptionUnavailable | ReportError::LedgerUnreachable(_) => ApiError::Unavailable(msg),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::Config(_) | ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}
