//! Signaling relay: the per-connection mediator
//!
//! The relay holds no state of its own. For every inbound envelope it
//! validates the transition against the [`CallSessionTable`], resolves the
//! target code through the [`IdentityRegistry`], and forwards the payload
//! verbatim through the transport's [`OutboundSink`], tagged with the
//! sender's code. Any failure produces a typed notice back to the sender
//! only; the target never hears about someone else's mistakes.
//!
//! The transport collaborator drives the relay through three hooks:
//! [`on_connect`](SignalingRelay::on_connect) once per new connection,
//! [`on_message`](SignalingRelay::on_message) per inbound envelope, and
//! [`on_disconnect`](SignalingRelay::on_disconnect) once per teardown
//! (tolerated more than once; repeats are no-ops).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::calls::CallSessionTable;
use crate::envelope::{ClientEnvelope, ServerEnvelope};
use crate::error::{Result, SignalError};
use crate::registry::IdentityRegistry;
use crate::types::{CodeConfig, ConnectionId, PeerCode};

/// Non-blocking outbound delivery primitive owned by the transport layer.
///
/// Implementations push the envelope into the target connection's outbound
/// queue and return `false` when that queue is gone. They must preserve
/// per-connection FIFO order and must never block.
pub trait OutboundSink: Send + Sync {
    fn deliver(&self, connection: ConnectionId, envelope: ServerEnvelope) -> bool;
}

enum PayloadKind {
    Offer,
    Answer,
    Candidate,
}

/// Mediator between connected endpoints, the identity registry, and the call
/// session table.
pub struct SignalingRelay {
    registry: Arc<IdentityRegistry>,
    calls: Arc<CallSessionTable>,
    sink: Arc<dyn OutboundSink>,
}

impl SignalingRelay {
    /// Create a relay with fresh tables, delivering through `sink`.
    pub fn new(config: CodeConfig, sink: Arc<dyn OutboundSink>) -> Self {
        SignalingRelay {
            registry: Arc::new(IdentityRegistry::new(config)),
            calls: Arc::new(CallSessionTable::new()),
            sink,
        }
    }

    /// The identity registry this relay mediates over.
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// The call session table this relay mediates over.
    pub fn calls(&self) -> &CallSessionTable {
        &self.calls
    }

    /// Hook invoked once per new connection.
    ///
    /// Allocates a code (recovering `requested` when it is reserved but
    /// unbound) and greets the endpoint with a `welcome` notice carrying it.
    pub fn on_connect(
        &self,
        connection: ConnectionId,
        requested: Option<&PeerCode>,
    ) -> Result<PeerCode> {
        let code = self.registry.allocate(connection, requested)?;
        info!(%connection, %code, "endpoint identified");
        self.sink
            .deliver(connection, ServerEnvelope::Welcome { code: code.clone() });
        Ok(code)
    }

    /// Hook invoked per inbound envelope.
    ///
    /// Failures are reported to the sender as an `error` notice; they never
    /// affect the target or any other connection.
    pub fn on_message(&self, connection: ConnectionId, envelope: ClientEnvelope) {
        if let Err(err) = self.dispatch(connection, envelope) {
            debug!(%connection, error = %err, "signaling operation failed");
            self.sink.deliver(connection, ServerEnvelope::error(&err));
        }
    }

    /// Hook invoked on connection teardown.
    ///
    /// Releases the identity (the code stays reserved for reconnect) and
    /// ends every call attempt the endpoint was part of, notifying each
    /// counterpart exactly once. Calling this again for the same connection
    /// is a no-op.
    pub fn on_disconnect(&self, connection: ConnectionId) {
        let Some(code) = self.registry.release(connection) else {
            return;
        };
        info!(%connection, %code, "endpoint disconnected");
        self.terminate_involving(&code);
    }

    fn dispatch(&self, connection: ConnectionId, envelope: ClientEnvelope) -> Result<()> {
        let source = self
            .registry
            .code_of(connection)
            .ok_or_else(|| SignalError::InvalidState("connection has no assigned code".into()))?;

        match envelope {
            ClientEnvelope::Invite { target } => self.handle_invite(connection, source, target),
            ClientEnvelope::Accept { target } => self.handle_accept(source, target),
            ClientEnvelope::Decline { target } => self.handle_decline(source, target),
            ClientEnvelope::Offer { target, payload } => {
                self.relay_payload(source, target, payload, PayloadKind::Offer)
            }
            ClientEnvelope::Answer { target, payload } => {
                self.relay_payload(source, target, payload, PayloadKind::Answer)
            }
            ClientEnvelope::Candidate { target, payload } => {
                self.relay_payload(source, target, payload, PayloadKind::Candidate)
            }
            ClientEnvelope::RequestNewId => self.handle_new_code(connection, source),
            ClientEnvelope::End { target } => self.handle_end(source, target),
        }
    }

    /// Idle -> Ringing. The target is resolved before anything else so an
    /// invite to an unreachable code creates no attempt at all.
    fn handle_invite(
        &self,
        connection: ConnectionId,
        source: PeerCode,
        target: PeerCode,
    ) -> Result<()> {
        let target_conn = self.registry.resolve(&target)?;
        self.calls.begin(source.clone(), target.clone())?;

        if !self.sink.deliver(
            target_conn,
            ServerEnvelope::IncomingCall {
                from: source.clone(),
            },
        ) {
            // The responder's queue vanished between resolve and deliver.
            self.calls.fail(&source, &target);
            return Err(SignalError::TargetUnreachable(target));
        }

        self.sink
            .deliver(connection, ServerEnvelope::Ringing { target });
        Ok(())
    }

    /// Ringing -> Negotiating. A stale accept is silently ignored.
    fn handle_accept(&self, source: PeerCode, target: PeerCode) -> Result<()> {
        if !self.calls.accept(&source, &target) {
            return Ok(());
        }
        let initiator_conn = self.registry.resolve(&target)?;
        if !self
            .sink
            .deliver(initiator_conn, ServerEnvelope::Accepted { from: source })
        {
            return Err(SignalError::TargetUnreachable(target));
        }
        Ok(())
    }

    /// Ringing -> Rejected. A stale decline is silently ignored.
    fn handle_decline(&self, source: PeerCode, target: PeerCode) -> Result<()> {
        if !self.calls.decline(&source, &target) {
            return Ok(());
        }
        let initiator_conn = self.registry.resolve(&target)?;
        if !self
            .sink
            .deliver(initiator_conn, ServerEnvelope::Declined { from: source })
        {
            return Err(SignalError::TargetUnreachable(target));
        }
        Ok(())
    }

    /// Forward an opaque negotiation payload, legal only while the attempt
    /// between sender and target is Negotiating.
    fn relay_payload(
        &self,
        source: PeerCode,
        target: PeerCode,
        payload: Value,
        kind: PayloadKind,
    ) -> Result<()> {
        if !self.calls.is_negotiating(&source, &target) {
            return Err(SignalError::InvalidState(format!(
                "no negotiating call between {source} and {target}"
            )));
        }
        let target_conn = self.registry.resolve(&target)?;
        let envelope = match kind {
            PayloadKind::Offer => ServerEnvelope::Offer {
                from: source,
                payload,
            },
            PayloadKind::Answer => ServerEnvelope::Answer {
                from: source,
                payload,
            },
            PayloadKind::Candidate => ServerEnvelope::Candidate {
                from: source,
                payload,
            },
        };
        if !self.sink.deliver(target_conn, envelope) {
            return Err(SignalError::TargetUnreachable(target));
        }
        Ok(())
    }

    /// any -> Ended. Ending a call that does not exist is a no-op.
    fn handle_end(&self, source: PeerCode, target: PeerCode) -> Result<()> {
        let Some(attempt) = self.calls.end(&source, &target) else {
            return Ok(());
        };
        let other = attempt.other_party(&source);
        if let Ok(other_conn) = self.registry.resolve(&other) {
            self.sink
                .deliver(other_conn, ServerEnvelope::CallEnded { from: source });
        }
        Ok(())
    }

    /// Swap the endpoint's code atomically, then end any calls that were
    /// addressed to the old one: once freed it may be re-allocated to a
    /// stranger and must not keep receiving that traffic.
    fn handle_new_code(&self, connection: ConnectionId, old: PeerCode) -> Result<()> {
        let fresh = self.registry.regenerate(connection)?;
        info!(%connection, %old, %fresh, "code regenerated");
        self.sink
            .deliver(connection, ServerEnvelope::NewCode { code: fresh });
        self.terminate_involving(&old);
        Ok(())
    }

    /// End every attempt involving `code` and send each counterpart a single
    /// termination notice, best effort.
    fn terminate_involving(&self, code: &PeerCode) {
        for attempt in self.calls.end_all_involving(code) {
            let other = attempt.other_party(code);
            if other == *code {
                continue;
            }
            if let Ok(other_conn) = self.registry.resolve(&other) {
                self.sink.deliver(
                    other_conn,
                    ServerEnvelope::CallEnded { from: code.clone() },
                );
            }
        }
    }
}
