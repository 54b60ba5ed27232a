//! Core data types for the signaling relay
//!
//! This module contains the identifier and call-state types shared by the
//! registry, the call session table, and the relay:
//!
//! - **PeerCode** - short human-enterable rendezvous code naming an endpoint
//! - **ConnectionId** - opaque transport-level session id
//! - **CodeConfig** - alphabet/length knobs for code generation
//! - **CallState / CallAttempt** - per-call lifecycle record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, SignalError};

/// Opaque handle to a live transport session.
///
/// Assigned by the connection collaborator when it accepts a connection; the
/// core never fabricates one for an existing session. A connection owns at
/// most one [`PeerCode`] at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a fresh connection id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Short human-enterable code naming an endpoint for rendezvous.
///
/// Codes are case-insensitive; the canonical form is uppercase and all
/// construction paths normalize to it, so two codes that differ only in case
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PeerCode(String);

impl PeerCode {
    /// Build a code from raw user input, trimming and uppercasing it.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    /// The canonical (uppercase) text of the code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Deserialization goes through `new` so codes arriving on the wire are
// normalized before they ever reach a lookup.
impl<'de> Deserialize<'de> for PeerCode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(PeerCode::new(raw))
    }
}

/// Configuration for rendezvous code generation.
#[derive(Debug, Clone)]
pub struct CodeConfig {
    /// The characters codes are drawn from, uppercase, no duplicates.
    pub alphabet: Vec<char>,
    /// Number of characters per code.
    pub length: usize,
}

impl Default for CodeConfig {
    fn default() -> Self {
        CodeConfig {
            alphabet: ('A'..='Z').chain('0'..='9').collect(),
            length: 4,
        }
    }
}

impl CodeConfig {
    /// Build a configuration from an alphabet string and a code length.
    ///
    /// The alphabet is uppercased and deduplicated; it must be non-empty
    /// ASCII alphanumeric and the length must be at least one.
    pub fn new(alphabet: &str, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(SignalError::Config("code length must be at least 1".into()));
        }
        let mut chars: Vec<char> = Vec::new();
        for ch in alphabet.chars() {
            if !ch.is_ascii_alphanumeric() {
                return Err(SignalError::Config(format!(
                    "alphabet character {ch:?} is not ASCII alphanumeric"
                )));
            }
            let ch = ch.to_ascii_uppercase();
            if !chars.contains(&ch) {
                chars.push(ch);
            }
        }
        if chars.is_empty() {
            return Err(SignalError::Config("alphabet must not be empty".into()));
        }
        Ok(CodeConfig {
            alphabet: chars,
            length,
        })
    }

    /// Total number of distinct codes this configuration can produce.
    pub fn capacity(&self) -> u128 {
        (self.alphabet.len() as u128)
            .checked_pow(self.length as u32)
            .unwrap_or(u128::MAX)
    }
}

/// State of one call attempt between two codes.
///
/// "Idle" is represented by the absence of an attempt, and negotiation
/// completion is not observable by the relay (payloads are opaque), so there
/// is no separate active state beyond [`CallState::Negotiating`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Invite delivered, awaiting the responder's decision.
    Ringing,
    /// Responder accepted; offer/answer/candidate exchange in progress.
    Negotiating,
    /// Terminal: a party ended the call or disconnected.
    Ended,
    /// Terminal: the responder declined.
    Rejected,
    /// Terminal: the attempt could not proceed.
    Failed,
}

impl CallState {
    /// Whether the state is terminal (the attempt no longer exists).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Rejected | CallState::Failed)
    }
}

/// One outstanding or active call between an initiator and a responder.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    /// Code of the endpoint that sent the invite.
    pub initiator: PeerCode,
    /// Code of the endpoint being rung.
    pub responder: PeerCode,
    /// Current lifecycle state.
    pub state: CallState,
    /// When the invite was observed.
    pub created_at: DateTime<Utc>,
}

impl CallAttempt {
    pub(crate) fn new(initiator: PeerCode, responder: PeerCode) -> Self {
        CallAttempt {
            initiator,
            responder,
            state: CallState::Ringing,
            created_at: Utc::now(),
        }
    }

    /// The counterpart of `code` in this attempt.
    pub fn other_party(&self, code: &PeerCode) -> PeerCode {
        if self.initiator == *code {
            self.responder.clone()
        } else {
            self.initiator.clone()
        }
    }
}
