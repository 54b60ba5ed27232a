//! Identity and call-signaling relay core
//!
//! This crate implements the stateful heart of a rendezvous relay for direct
//! peer transports: endpoints identified by short human-readable codes find
//! each other and exchange opaque negotiation payloads (session descriptions
//! and connectivity candidates) through it. The relay never interprets those
//! payloads; it owns identity management, per-call state, and in-order
//! delivery to the correct counterpart.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        transport collaborator           │  accept / send / close
//! ├─────────────────────────────────────────┤
//! │            SignalingRelay               │  validate, resolve, forward
//! ├────────────────────┬────────────────────┤
//! │  IdentityRegistry  │  CallSessionTable  │  the only shared state
//! └────────────────────┴────────────────────┘
//! ```
//!
//! The transport layer calls [`SignalingRelay::on_connect`] once per new
//! connection, [`SignalingRelay::on_message`] per inbound envelope, and
//! [`SignalingRelay::on_disconnect`] on teardown, and provides outbound
//! delivery by implementing [`OutboundSink`].
//!
//! # Identity semantics
//!
//! Disconnecting releases a code's binding but keeps the code reserved, so an
//! endpoint that reconnects with `requested = Some(code)` recovers its
//! identity. Only an explicit regeneration (`requestNewId`) frees a code for
//! reuse by others. This is deliberate: a brief network blip should not cost
//! an endpoint the code its peer is about to dial.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use peerlink_signal_core::{
//!     CodeConfig, ConnectionId, OutboundSink, ServerEnvelope, SignalingRelay,
//! };
//!
//! struct NullSink;
//! impl OutboundSink for NullSink {
//!     fn deliver(&self, _connection: ConnectionId, _envelope: ServerEnvelope) -> bool {
//!         true
//!     }
//! }
//!
//! let relay = SignalingRelay::new(CodeConfig::default(), Arc::new(NullSink));
//! let connection = ConnectionId::new();
//! let code = relay.on_connect(connection, None).unwrap();
//! assert_eq!(code.as_str().len(), 4);
//! ```

pub mod calls;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod relay;
pub mod types;

pub use calls::CallSessionTable;
pub use envelope::{ClientEnvelope, ServerEnvelope};
pub use error::{ErrorCode, Result, SignalError};
pub use registry::IdentityRegistry;
pub use relay::{OutboundSink, SignalingRelay};
pub use types::{CallAttempt, CallState, CodeConfig, ConnectionId, PeerCode};

/// Re-export of common types for easier use.
pub mod prelude {
    pub use crate::{
        CallAttempt, CallSessionTable, CallState, ClientEnvelope, CodeConfig, ConnectionId,
        ErrorCode, IdentityRegistry, OutboundSink, PeerCode, Result, ServerEnvelope, SignalError,
        SignalingRelay,
    };
}
