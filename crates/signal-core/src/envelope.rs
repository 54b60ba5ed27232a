//! Wire envelopes exchanged with connected endpoints
//!
//! Message kinds are closed tagged enums, so adding a kind is a compile-time
//! checked change and dispatch is exhaustive. Negotiation payload bodies
//! (session descriptions, connectivity candidates) travel as opaque
//! [`serde_json::Value`]s: the relay reads only the envelope fields it needs
//! for routing and forwards the body verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, SignalError};
use crate::types::PeerCode;

/// Messages an endpoint sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientEnvelope {
    /// Ring the endpoint named by `target`.
    Invite { target: PeerCode },
    /// Accept the pending invite from `target`.
    Accept { target: PeerCode },
    /// Decline the pending invite from `target`.
    Decline { target: PeerCode },
    /// Session description offer for `target`; body is opaque.
    Offer { target: PeerCode, payload: Value },
    /// Session description answer for `target`; body is opaque.
    Answer { target: PeerCode, payload: Value },
    /// Connectivity candidate for `target`; body is opaque.
    Candidate { target: PeerCode, payload: Value },
    /// Discard the current code and receive a fresh one.
    RequestNewId,
    /// End or cancel the call with `target`.
    End { target: PeerCode },
}

/// Messages the relay sends to an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerEnvelope {
    /// Sent once per connection with the assigned code.
    Welcome { code: PeerCode },
    /// Reply to `requestNewId` with the regenerated code.
    NewCode { code: PeerCode },
    /// `from` is ringing this endpoint.
    IncomingCall { from: PeerCode },
    /// Acknowledges the sender's invite: `target` is being rung.
    Ringing { target: PeerCode },
    /// `from` accepted this endpoint's invite.
    Accepted { from: PeerCode },
    /// `from` declined this endpoint's invite.
    Declined { from: PeerCode },
    /// Forwarded offer, tagged with the sender's code.
    Offer { from: PeerCode, payload: Value },
    /// Forwarded answer, tagged with the sender's code.
    Answer { from: PeerCode, payload: Value },
    /// Forwarded candidate, tagged with the sender's code.
    Candidate { from: PeerCode, payload: Value },
    /// The call with `from` ended (hangup, cancel, or disconnect).
    CallEnded { from: PeerCode },
    /// A typed failure notice, sent only to the offending connection.
    Error { code: ErrorCode, message: String },
}

impl ServerEnvelope {
    /// Build the failure notice for `err`.
    pub fn error(err: &SignalError) -> Self {
        ServerEnvelope::Error {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
