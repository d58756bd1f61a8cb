//! Peer connection state and transport-neutral frames.
//!
//! A `Connection` is one link in the overlay tree: either an inbound child
//! accepted by the server, or the single outbound parent link. The router owns
//! every `Connection` and addresses it by integer id; transport tasks hold
//! only the id plus the receiving end of the frame channel, so a connection
//! can be torn down by the router while its socket task is still draining.

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::Message as WsMessage;

pub type ConnectionId = u64;

/// One WebSocket frame, decoupled from the concrete transport's message type.
///
/// Inbound server sockets (axum) and the outbound parent socket (tungstenite)
/// use different message enums; the router only ever sees `Frame`.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<String>),
}

impl Frame {
    /// Convert a received tungstenite message. Raw frames are skipped.
    pub fn from_ws(msg: WsMessage) -> Option<Frame> {
        match msg {
            WsMessage::Text(t) => Some(Frame::Text(t.as_str().to_string())),
            WsMessage::Binary(b) => Some(Frame::Binary(b.to_vec())),
            WsMessage::Ping(p) => Some(Frame::Ping(p.to_vec())),
            WsMessage::Pong(p) => Some(Frame::Pong(p.to_vec())),
            WsMessage::Close(c) => Some(Frame::Close(c.map(|f| f.reason.as_str().to_string()))),
            WsMessage::Frame(_) => None,
        }
    }

    pub fn into_ws(self) -> WsMessage {
        match self {
            Frame::Text(t) => WsMessage::text(t),
            Frame::Binary(b) => WsMessage::binary(b),
            Frame::Ping(p) => WsMessage::Ping(p.into()),
            Frame::Pong(p) => WsMessage::Pong(p.into()),
            Frame::Close(reason) => WsMessage::Close(reason.map(|r| CloseFrame {
                code: CloseCode::Normal,
                reason: r.into(),
            })),
        }
    }
}

/// A peer link owned by the router.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Claimed identity; set once authentication succeeds.
    pub self_id: Option<String>,
    pub authenticated: bool,
    pub is_parent: bool,
    /// Send queue consumed by the socket task. Internally synchronized, so it
    /// is the one piece of connection state other threads may touch.
    pub sender: UnboundedSender<Frame>,
    /// Frames received before authentication completed, replayed in order
    /// once the peer is accepted.
    pub pending: Vec<Frame>,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: UnboundedSender<Frame>, is_parent: bool) -> Self {
        Self {
            id,
            self_id: None,
            authenticated: false,
            is_parent,
            sender,
            pending: Vec::new(),
        }
    }

    /// Queue a frame for transmission. A closed channel means the socket task
    /// already exited; the router will observe the close separately.
    pub fn send(&self, frame: Frame) {
        if let Err(e) = self.sender.send(frame) {
            warn!("failed to queue frame for connection {}: {}", self.id, e);
        }
    }
}
