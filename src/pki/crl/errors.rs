use thiserror::Error;
use x509_parser::prelude::X509Error;

use super::types::CaId;

/// Failure reported by a persistence port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// A concurrent writer got there first, e.g. a CRL number was already taken
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Failure reported by the signing engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningEngineError {
    #[error("CA token is offline")]
    TokenOffline,

    #[error("No signing key for issuer {0}")]
    UnknownIssuer(String),

    #[error("Signing failed: {0}")]
    Failed(String),
}

/// CRL generation errors
#[derive(Error, Debug)]
pub enum CrlError {
    #[error("CA token for CA {ca_id} is offline")]
    TokenOffline { ca_id: CaId },

    #[error("CA {ca_id} does not exist")]
    CaNotFound { ca_id: CaId },

    #[error("Signing CRL for CA {ca_id} failed: {cause}")]
    SigningError { ca_id: CaId, cause: String },

    #[error("Store error for CA {ca_id}: {cause}")]
    StoreError {
        ca_id: CaId,
        #[source]
        cause: PersistenceError,
    },

    #[error("Listing CAs failed: {0}")]
    Registry(#[source] PersistenceError),

    #[error("No base CRL exists for CA {ca_id} partition {partition_index}")]
    NoBaseCrl { ca_id: CaId, partition_index: u32 },

    #[error("Invalid configuration for CA {ca_id}: {reason}")]
    InvalidConfiguration { ca_id: CaId, reason: String },

    #[error("CRL parsing failed: {0}")]
    Parse(#[from] X509Error),

    #[error("CRL encoding failed: {0}")]
    Encoding(#[from] der::Error),
}

impl CrlError {
    pub(crate) fn store(ca_id: CaId) -> impl FnOnce(PersistenceError) -> Self {
        move |cause| CrlError::StoreError { ca_id, cause }
    }

    pub(crate) fn signing(ca_id: CaId) -> impl FnOnce(SigningEngineError) -> Self {
        move |e| match e {
            SigningEngineError::TokenOffline => CrlError::TokenOffline { ca_id },
            other => CrlError::SigningError {
                ca_id,
                cause: other.to_string(),
            },
        }
    }

    /// Whether the next sweep may succeed without operator intervention
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrlError::TokenOffline { .. }
                | CrlError::SigningError { .. }
                | CrlError::StoreError { .. }
                | CrlError::Registry(_)
        )
    }
}

/// Convenient Result type alias
pub type CrlResult<T> = Result<T, CrlError>;
