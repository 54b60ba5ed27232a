//! Connection lifecycle: websocket accept, outbound queues, teardown
//!
//! Each accepted socket gets one reader loop and one writer task. The writer
//! drains an unbounded mpsc channel, which is the connection's FIFO outbound
//! queue: envelopes are sent in exactly the order the relay delivered them.
//! The reader decodes text frames into [`ClientEnvelope`]s and feeds them to
//! the relay one at a time, preserving the sender's emission order.
//!
//! Every exit path (clean close, read error, undecodable upgrade) converges
//! on a single teardown sequence, so the relay observes at most one
//! disconnect per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use peerlink_signal_core::{
    ClientEnvelope, ConnectionId, OutboundSink, PeerCode, ServerEnvelope, SignalError,
    SignalingRelay,
};

/// The live outbound queues, one per connection.
///
/// This is the relay's delivery primitive: a missing or closed queue makes
/// [`OutboundSink::deliver`] return `false`, which the relay surfaces to the
/// sender as an unreachable target.
pub struct ConnectionTable {
    senders: DashMap<ConnectionId, mpsc::UnboundedSender<ServerEnvelope>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        ConnectionTable {
            senders: DashMap::new(),
        }
    }

    fn register(&self, connection: ConnectionId) -> mpsc::UnboundedReceiver<ServerEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(connection, tx);
        rx
    }

    fn deregister(&self, connection: ConnectionId) {
        self.senders.remove(&connection);
    }
}

impl OutboundSink for ConnectionTable {
    fn deliver(&self, connection: ConnectionId, envelope: ServerEnvelope) -> bool {
        match self.senders.get(&connection) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }
}

/// Extract a parameter from a raw query string.
fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// The reconnect code from the upgrade request URI, e.g. `/?code=AB12`.
fn requested_code(request: &Request) -> Option<PeerCode> {
    request
        .uri()
        .query()
        .and_then(|query| query_param(query, "code"))
        .filter(|raw| !raw.trim().is_empty())
        .map(PeerCode::new)
}

/// Decode a text frame into a [`ClientEnvelope`].
///
/// An undecodable frame gets a `malformed` notice back to the sender and is
/// otherwise dropped; it never terminates the connection.
fn decode_frame(
    connection: ConnectionId,
    text: &str,
    sink: &dyn OutboundSink,
) -> Option<ClientEnvelope> {
    match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            debug!(%connection, error = %err, "undecodable frame");
            sink.deliver(
                connection,
                ServerEnvelope::error(&SignalError::Malformed(err.to_string())),
            );
            None
        }
    }
}

/// Drive one connection from websocket upgrade to teardown.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<SignalingRelay>,
    table: Arc<ConnectionTable>,
) -> anyhow::Result<()> {
    let mut requested: Option<PeerCode> = None;
    let ws = tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            requested = requested_code(request);
            Ok(response)
        },
    )
    .await?;

    let connection = ConnectionId::new();
    info!(%connection, %peer_addr, "websocket connection established");

    let mut outbound = table.register(connection);
    let (mut ws_tx, mut ws_rx) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode envelope");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    match relay.on_connect(connection, requested.as_ref()) {
        Ok(code) => {
            debug!(%connection, %code, "code assigned");
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(envelope) = decode_frame(connection, &text, table.as_ref()) {
                            relay.on_message(connection, envelope);
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    // Binary frames are not part of the protocol; ping/pong
                    // is answered by the websocket layer itself.
                    Ok(_) => {}
                    Err(err) => {
                        debug!(%connection, error = %err, "websocket read error");
                        break;
                    }
                }
            }
        }
        Err(err) => {
            warn!(%connection, error = %err, "failed to assign code");
            table.deliver(connection, ServerEnvelope::error(&err));
        }
    }

    // Single teardown funnel: the relay tolerates repeats, but every exit
    // path above lands here exactly once per connection.
    relay.on_disconnect(connection);
    table.deregister(connection);
    let _ = writer.await;
    info!(%connection, "connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_param_finds_key_among_pairs() {
        assert_eq!(query_param("a=1&code=AB12&b=2", "code"), Some("AB12"));
        assert_eq!(query_param("code=AB12", "code"), Some("AB12"));
        assert_eq!(query_param("a=1&b=2", "code"), None);
        assert_eq!(query_param("code", "code"), None);
    }

    #[test]
    fn requested_code_is_read_from_upgrade_uri() {
        let request = Request::builder()
            .uri("/?code=ab12")
            .body(())
            .unwrap();
        assert_eq!(requested_code(&request), Some(PeerCode::new("AB12")));

        let bare = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(requested_code(&bare), None);

        let empty = Request::builder().uri("/?code=").body(()).unwrap();
        assert_eq!(requested_code(&empty), None);
    }

    #[tokio::test]
    async fn undecodable_frame_replies_malformed_without_dropping_the_connection() {
        use peerlink_signal_core::ErrorCode;

        let table = ConnectionTable::new();
        let connection = ConnectionId::new();
        let mut outbound = table.register(connection);

        // Garbage, an unknown kind, and a missing field: all malformed.
        for text in ["not json", r#"{"kind":"teleport"}"#, r#"{"kind":"invite"}"#] {
            assert_eq!(decode_frame(connection, text, &table), None);
        }
        for _ in 0..3 {
            match outbound.recv().await {
                Some(ServerEnvelope::Error { code, .. }) => assert_eq!(code, ErrorCode::Malformed),
                other => panic!("expected malformed notice, got {other:?}"),
            }
        }

        // The queue survives and well-formed frames still decode.
        let decoded = decode_frame(connection, r#"{"kind":"invite","target":"ab12"}"#, &table);
        assert_eq!(
            decoded,
            Some(ClientEnvelope::Invite {
                target: PeerCode::new("AB12")
            })
        );
        assert!(table.deliver(
            connection,
            ServerEnvelope::Welcome {
                code: PeerCode::new("AB12")
            }
        ));
    }

    #[test]
    fn deliver_fails_for_unknown_connection() {
        let table = ConnectionTable::new();
        let ghost = ConnectionId::new();
        assert!(!table.deliver(
            ghost,
            ServerEnvelope::Welcome {
                code: PeerCode::new("AAAA")
            }
        ));
    }

    #[tokio::test]
    async fn deliver_preserves_fifo_order() {
        let table = ConnectionTable::new();
        let connection = ConnectionId::new();
        let mut outbound = table.register(connection);

        for code in ["AAAA", "BBBB", "CCCC"] {
            assert!(table.deliver(
                connection,
                ServerEnvelope::IncomingCall {
                    from: PeerCode::new(code)
                }
            ));
        }

        for code in ["AAAA", "BBBB", "CCCC"] {
            assert_eq!(
                outbound.recv().await,
                Some(ServerEnvelope::IncomingCall {
                    from: PeerCode::new(code)
                })
            );
        }

        table.deregister(connection);
        assert!(!table.deliver(
            connection,
            ServerEnvelope::Welcome {
                code: PeerCode::new("DDDD")
            }
        ));
    }
}
