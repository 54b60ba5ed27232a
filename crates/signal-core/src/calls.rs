//! Call session table: one state machine per call attempt
//!
//! The table owns every in-progress [`CallAttempt`], keyed by the
//! (initiator, responder) code pair, behind a single mutex. Only non-terminal
//! attempts are stored: reaching a terminal state removes the attempt, so
//! "Idle" is simply the absence of an entry. A responder index enforces the
//! invariant that at most one non-terminal attempt exists per responder code
//! at a time.
//!
//! The table validates transitions; it never resolves codes or delivers
//! messages. That separation keeps all call-state reasoning in one place
//! while the relay handles addressing.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, SignalError};
use crate::types::{CallAttempt, CallState, PeerCode};

#[derive(Default)]
struct CallsInner {
    /// (initiator, responder) -> attempt; entries are always non-terminal
    attempts: HashMap<(PeerCode, PeerCode), CallAttempt>,
    /// responder -> initiator, for the busy check
    by_responder: HashMap<PeerCode, PeerCode>,
}

impl CallsInner {
    fn remove(&mut self, key: &(PeerCode, PeerCode), terminal: CallState) -> Option<CallAttempt> {
        let mut attempt = self.attempts.remove(key)?;
        self.by_responder.remove(&key.1);
        attempt.state = terminal;
        Some(attempt)
    }
}

/// Table of in-progress call attempts.
pub struct CallSessionTable {
    inner: Mutex<CallsInner>,
}

impl CallSessionTable {
    pub fn new() -> Self {
        CallSessionTable {
            inner: Mutex::new(CallsInner::default()),
        }
    }

    /// Idle -> Ringing: record a new invite from `initiator` to `responder`.
    ///
    /// Fails with [`SignalError::ResponderBusy`] when the responder already
    /// has a non-terminal attempt; a second invite is rejected, never queued.
    pub fn begin(&self, initiator: PeerCode, responder: PeerCode) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.by_responder.contains_key(&responder) {
            return Err(SignalError::ResponderBusy(responder));
        }
        debug!(%initiator, %responder, "call attempt created");
        inner.by_responder.insert(responder.clone(), initiator.clone());
        inner
            .attempts
            .insert((initiator.clone(), responder.clone()), CallAttempt::new(initiator, responder));
        Ok(())
    }

    /// Ringing -> Negotiating: the responder accepted.
    ///
    /// Returns `false` when no matching Ringing attempt exists (stale or
    /// duplicate decision); that is a tolerated no-op, not an error.
    pub fn accept(&self, responder: &PeerCode, initiator: &PeerCode) -> bool {
        let mut inner = self.inner.lock();
        match inner
            .attempts
            .get_mut(&(initiator.clone(), responder.clone()))
        {
            Some(attempt) if attempt.state == CallState::Ringing => {
                attempt.state = CallState::Negotiating;
                debug!(%initiator, %responder, "call attempt accepted");
                true
            }
            _ => false,
        }
    }

    /// Ringing -> Rejected: the responder declined; the attempt is removed.
    ///
    /// Returns `false` for a stale or duplicate decline, which is a no-op.
    pub fn decline(&self, responder: &PeerCode, initiator: &PeerCode) -> bool {
        let mut inner = self.inner.lock();
        let key = (initiator.clone(), responder.clone());
        let ringing =
            matches!(inner.attempts.get(&key), Some(attempt) if attempt.state == CallState::Ringing);
        if !ringing {
            return false;
        }
        inner.remove(&key, CallState::Rejected);
        debug!(%initiator, %responder, "call attempt declined");
        true
    }

    /// Whether a Negotiating attempt exists between `a` and `b`, in either
    /// role. Offer/answer/candidate payloads are only legal in that state.
    pub fn is_negotiating(&self, a: &PeerCode, b: &PeerCode) -> bool {
        let inner = self.inner.lock();
        let negotiating = |key: &(PeerCode, PeerCode)| {
            matches!(inner.attempts.get(key), Some(attempt) if attempt.state == CallState::Negotiating)
        };
        negotiating(&(a.clone(), b.clone())) || negotiating(&(b.clone(), a.clone()))
    }

    /// any -> Ended: explicit end/cancel from either party.
    ///
    /// Removes the attempt between `a` and `b` regardless of role order and
    /// returns it, or `None` when no attempt exists (no-op).
    pub fn end(&self, a: &PeerCode, b: &PeerCode) -> Option<CallAttempt> {
        let mut inner = self.inner.lock();
        inner
            .remove(&(a.clone(), b.clone()), CallState::Ended)
            .or_else(|| inner.remove(&(b.clone(), a.clone()), CallState::Ended))
    }

    /// Ringing -> Failed: the invite could not be delivered after the
    /// attempt was created (the responder's queue vanished in between).
    pub fn fail(&self, initiator: &PeerCode, responder: &PeerCode) -> Option<CallAttempt> {
        let mut inner = self.inner.lock();
        inner.remove(&(initiator.clone(), responder.clone()), CallState::Failed)
    }

    /// Remove every non-terminal attempt involving `code`, marking each
    /// Ended. Used when a party disconnects or regenerates its code.
    pub fn end_all_involving(&self, code: &PeerCode) -> Vec<CallAttempt> {
        let mut inner = self.inner.lock();
        let keys: Vec<(PeerCode, PeerCode)> = inner
            .attempts
            .keys()
            .filter(|(initiator, responder)| initiator == code || responder == code)
            .cloned()
            .collect();
        keys.iter()
            .filter_map(|key| inner.remove(key, CallState::Ended))
            .collect()
    }

    /// The attempt for the exact (initiator, responder) pair, if any.
    ///
    /// Introspection helper for tests and diagnostics; the relay itself only
    /// drives the transition operations above.
    pub fn get(&self, initiator: &PeerCode, responder: &PeerCode) -> Option<CallAttempt> {
        self.inner
            .lock()
            .attempts
            .get(&(initiator.clone(), responder.clone()))
            .cloned()
    }

    /// Number of in-progress attempts. Introspection helper for tests and
    /// diagnostics.
    pub fn len(&self) -> usize {
        self.inner.lock().attempts.len()
    }
}

impl Default for CallSessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn codes() -> (PeerCode, PeerCode) {
        (PeerCode::new("AAAA"), PeerCode::new("BBBB"))
    }

    #[test]
    fn invite_accept_reaches_negotiating() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        table.begin(a.clone(), b.clone()).unwrap();
        assert_eq!(table.get(&a, &b).unwrap().state, CallState::Ringing);

        assert!(table.accept(&b, &a));
        assert_eq!(table.get(&a, &b).unwrap().state, CallState::Negotiating);
        assert!(table.is_negotiating(&a, &b));
        assert!(table.is_negotiating(&b, &a));
    }

    #[test]
    fn second_invite_to_busy_responder_is_rejected() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        let c = PeerCode::new("CCCC");
        table.begin(a, b.clone()).unwrap();

        let err = table.begin(c, b.clone()).unwrap_err();
        assert_eq!(err, SignalError::ResponderBusy(b));
    }

    #[test]
    fn responder_frees_up_after_terminal_state() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        table.begin(a.clone(), b.clone()).unwrap();
        assert!(table.decline(&b, &a));
        assert_eq!(table.len(), 0);

        // Rejected is terminal, so the responder can be rung again.
        table.begin(a, b).unwrap();
    }

    #[test]
    fn stale_decisions_are_noops() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        assert!(!table.accept(&b, &a));
        assert!(!table.decline(&b, &a));

        // Accepted attempts no longer ring, so a second decision is stale.
        table.begin(a.clone(), b.clone()).unwrap();
        assert!(table.accept(&b, &a));
        assert!(!table.accept(&b, &a));
        assert!(!table.decline(&b, &a));
        assert_eq!(table.get(&a, &b).unwrap().state, CallState::Negotiating);
    }

    #[test]
    fn payloads_require_negotiating_state() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        assert!(!table.is_negotiating(&a, &b));
        table.begin(a.clone(), b.clone()).unwrap();
        // Still ringing: not legal yet.
        assert!(!table.is_negotiating(&a, &b));
    }

    #[test]
    fn end_works_from_either_side_and_only_once() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        table.begin(a.clone(), b.clone()).unwrap();

        let ended = table.end(&b, &a).unwrap();
        assert_eq!(ended.state, CallState::Ended);
        assert_eq!(ended.other_party(&b), a);
        assert!(table.end(&a, &b).is_none());
    }

    #[test]
    fn failed_delivery_removes_the_attempt() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        table.begin(a.clone(), b.clone()).unwrap();

        let failed = table.fail(&a, &b).unwrap();
        assert_eq!(failed.state, CallState::Failed);
        assert_eq!(table.len(), 0);
        // The responder is free again.
        table.begin(a, b).unwrap();
    }

    #[test]
    fn end_all_involving_sweeps_both_roles() {
        let table = CallSessionTable::new();
        let (a, b) = codes();
        let c = PeerCode::new("CCCC");
        // a rings b, and c rings a: a is involved in both.
        table.begin(a.clone(), b.clone()).unwrap();
        table.begin(c.clone(), a.clone()).unwrap();

        let ended = table.end_all_involving(&a);
        assert_eq!(ended.len(), 2);
        assert_eq!(table.len(), 0);
        assert!(ended.iter().all(|attempt| attempt.state == CallState::Ended));
    }
}
