//! Unified error taxonomy for registry synchronization
//!
//! Every failure a synchronization can hit is classified here; no layer is
//! allowed to absorb a lower-layer failure or downgrade it to a warning. The
//! taxonomy separates transport faults (fatal to the session) from protocol
//! faults (fatal to the request), authentication faults (fatal to the
//! session, no further requests), registry rejections (the operation failed
//! but logout may still be attempted) and precondition failures (nothing was
//! attempted, safe to retry later).

use thiserror::Error;

use crate::epp::codec::TransportError;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Connection-level failure; the session is dead.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The peer spoke something that is not the protocol: unparseable XML,
    /// missing result element, unexpected document shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Login was rejected. The session must not issue further requests
    /// without reconnecting.
    #[error("Authentication rejected by registry: {0}")]
    Authentication(String),

    /// A well-formed response carrying a non-success result.
    #[error("Registry rejected {operation} for {zone}: {code} {message}{detail}")]
    Rejected {
        zone: String,
        operation: String,
        code: String,
        message: String,
        /// Vendor extension sub-conditions, pre-formatted; empty when absent
        detail: String,
    },

    /// A backend-specific gating check failed before any mutating call was
    /// made. The registry state is untouched.
    #[error("Precondition failed for {zone}: {reason}")]
    PreconditionFailed { zone: String, reason: String },

    /// An update plan was applied in part: `removed`/`added` counts record
    /// how far it got before `cause`. The registry is in a known
    /// intermediate state and a later synchronization will converge it.
    #[error(
        "Update partially applied for {zone} ({removed} removals, {added} additions done): {cause}"
    )]
    PartiallyApplied {
        zone: String,
        removed: usize,
        added: usize,
        cause: Box<RegistryError>,
    },

    /// Invalid local input: zone name, key material, configuration value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<crate::keyset::KeyError> for RegistryError {
    fn from(err: crate::keyset::KeyError) -> Self {
        RegistryError::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
