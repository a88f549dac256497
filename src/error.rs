use reqwest::StatusCode;
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::metering::MeteringError;
use crate::protocol::InvocationError;
use crate::schema::{CompilationError, ValidationError};
use crate::store::StoreError;

/// Nginx-style "client closed request"; there is no registered status for it.
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },
    #[error("out of credits: user {user_id}")]
    OutOfCredits { user_id: String },
    #[error("unsupported identity provider: {provider}")]
    UnsupportedIdentityProvider { provider: String },
    #[error("invalid contract: {0}")]
    Compilation(#[from] CompilationError),
    #[error("invalid payload: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Invocation(#[from] InvocationError),
    #[error(transparent)]
    Metering(#[from] MeteringError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::OutOfCredits { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::UnsupportedIdentityProvider { .. } => StatusCode::FORBIDDEN,
            Error::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Validation(_) | Error::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Invocation(InvocationError::Cancelled) => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Invocation(InvocationError::ModelNotConfigured { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Invocation(_) => StatusCode::BAD_GATEWAY,
            Error::Compilation(_) | Error::Metering(_) | Error::Store(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::OutOfCredits { .. } => "out_of_credits",
            Error::UnsupportedIdentityProvider { .. } => "unsupported_identity_provider",
            Error::Store(StoreError::NotFound { .. }) => "not_found",
            Error::Compilation(_) => "invalid_contract",
            Error::Validation(_) => "invalid_payload",
            Error::Codec(CodecError::UnsupportedContentType(_)) => "invalid_content_type",
            Error::Codec(_) => "invalid_body",
            Error::Invocation(err) => err.code(),
            Error::Metering(_) => "unknown_model_cost_rate",
            Error::Store(_) => "store_error",
            Error::Config(_) => "config_error",
        }
    }
}
