//! Error types for the signaling relay core
//!
//! All errors here are local: they terminate only the offending operation and
//! are reported back to the originating connection as a typed `error`
//! envelope. None of them is fatal to the process or to other connections.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PeerCode;

/// Main result type for signaling operations.
pub type Result<T> = std::result::Result<T, SignalError>;

/// Error taxonomy for the identity registry, the call session table, and the
/// relay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The code is unallocated, or allocated but not bound to a live
    /// connection.
    #[error("no live connection for code {0}")]
    NotFound(PeerCode),

    /// The code resolved, but the target's outbound queue is gone.
    #[error("target {0} is unreachable")]
    TargetUnreachable(PeerCode),

    /// The message kind is not legal for the current call-attempt state.
    #[error("invalid call state: {0}")]
    InvalidState(String),

    /// The invited responder already has a call in progress.
    #[error("responder {0} is busy")]
    ResponderBusy(PeerCode),

    /// Every code in the configured alphabet space is allocated.
    #[error("code space exhausted ({0} codes allocated)")]
    AllocationExhausted(usize),

    /// The inbound frame could not be decoded as an envelope.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// Invalid configuration (alphabet or code length).
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Wire-level discriminant included in `error` envelopes sent back to the
/// offending connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    NotFound,
    TargetUnreachable,
    InvalidState,
    ResponderBusy,
    AllocationExhausted,
    Malformed,
    Internal,
}

impl SignalError {
    /// The wire-level code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SignalError::NotFound(_) => ErrorCode::NotFound,
            SignalError::TargetUnreachable(_) => ErrorCode::TargetUnreachable,
            SignalError::InvalidState(_) => ErrorCode::InvalidState,
            SignalError::ResponderBusy(_) => ErrorCode::ResponderBusy,
            SignalError::AllocationExhausted(_) => ErrorCode::AllocationExhausted,
            SignalError::Malformed(_) => ErrorCode::Malformed,
            SignalError::Config(_) => ErrorCode::Internal,
        }
    }
}
