//! Wire message definitions.
//!
//! Every routed message is a JSON `Envelope` carrying a `msg` kind, a list of
//! `targets` (paths still to be consumed) and an `origin` (the return path,
//! grown one hop at a time as the message crosses connections). Binary
//! payloads travel in a framed variant: the JSON header with `data` replaced
//! by the payload length, a NUL separator, then the raw bytes.

use serde::{Deserialize, Serialize};

use crate::connection::Frame;
use crate::utils::error::RouterError;

/// Closed set of routed message kinds. Dispatch is a plain `match`; there is
/// no open-ended handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgKind {
    Subscribe,
    SubscribeFailed,
    Publish,
    PublishAt,
    Unsubscribe,
    NoRoute,
    Query,
    QueryResponse,
}

impl MsgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgKind::Subscribe => "subscribe",
            MsgKind::SubscribeFailed => "subscribe_failed",
            MsgKind::Publish => "publish",
            MsgKind::PublishAt => "publish_at",
            MsgKind::Unsubscribe => "unsubscribe",
            MsgKind::NoRoute => "no_route",
            MsgKind::Query => "query",
            MsgKind::QueryResponse => "query_response",
        }
    }
}

/// One registered topic as reported by a topology query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    #[serde(rename = "topicId")]
    pub topic_id: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// The routed message envelope.
///
/// `data` holds text payloads; raw bytes for binary-mode messages live in
/// `blob`, which never serializes directly (see the framing functions below).
/// The `type` field is the content type on publish messages and the node type
/// on query responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub msg: MsgKind,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_msg: Option<Box<Envelope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(rename = "selfId", default, skip_serializing_if = "Option::is_none")]
    pub self_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<TopicInfo>>,
    /// Raw payload bytes for binary-mode messages. Carried out of band of the
    /// JSON header; populated by `from_binary_frame`.
    #[serde(skip)]
    pub blob: Option<Vec<u8>>,
}

impl Envelope {
    fn base(msg: MsgKind, targets: Vec<String>) -> Self {
        Self {
            msg,
            targets,
            // every message starts life addressed from "this node"
            origin: ".".to_string(),
            topic: None,
            data: None,
            r#type: None,
            persisted: None,
            binary: None,
            remote_origin: None,
            failed_msg: None,
            orig_msg: None,
            request: None,
            self_id: None,
            name: None,
            version: None,
            parent_id: None,
            children: None,
            topics: None,
            blob: None,
        }
    }

    pub fn subscribe(path: &str) -> Self {
        Self::base(MsgKind::Subscribe, vec![path.to_string()])
    }

    pub fn unsubscribe(path: &str) -> Self {
        Self::base(MsgKind::Unsubscribe, vec![path.to_string()])
    }

    pub fn publish(
        topic: &str,
        content_type: &str,
        data: &[u8],
        persisted: bool,
        binary: bool,
        targets: Vec<String>,
        remote_origin: Option<String>,
    ) -> Self {
        let mut env = Self::base(MsgKind::Publish, targets);
        env.topic = Some(topic.to_string());
        env.r#type = Some(content_type.to_string());
        env.persisted = Some(persisted);
        env.binary = Some(binary);
        env.remote_origin = remote_origin;
        if binary {
            env.blob = Some(data.to_vec());
        } else {
            env.data = Some(String::from_utf8_lossy(data).into_owned());
        }
        env
    }

    pub fn publish_at(path: &str, data: &[u8], persisted: bool, binary: bool) -> Self {
        let mut env = Self::base(MsgKind::PublishAt, vec![path.to_string()]);
        env.persisted = Some(persisted);
        env.binary = Some(binary);
        if binary {
            env.blob = Some(data.to_vec());
        } else {
            env.data = Some(String::from_utf8_lossy(data).into_owned());
        }
        env
    }

    pub fn query(path: &str, request_id: u64) -> Self {
        let mut env = Self::base(MsgKind::Query, vec![path.to_string()]);
        env.request = Some(request_id.to_string());
        env
    }

    /// Bounce for a subscribe that named an unknown topic. Addressed back to
    /// the subscriber along the subscribe's own origin.
    pub fn subscribe_failed(failed: &Envelope, topic: &str) -> Self {
        let mut env = Self::base(MsgKind::SubscribeFailed, vec![failed.origin.clone()]);
        env.failed_msg = Some(failed.msg.as_str().to_string());
        let mut orig = failed.clone();
        orig.targets = vec![topic.to_string()];
        orig.blob = None;
        env.orig_msg = Some(Box::new(orig));
        env
    }

    /// Bounce for a message whose next hop could not be resolved. The origin
    /// is the unresolved hop itself: as the bounce travels back, the normal
    /// prepend rules turn it into the full path of the unreachable peer as
    /// seen from the original sender.
    pub fn no_route(failed: &Envelope, hop: &str) -> Self {
        let mut env = Self::base(MsgKind::NoRoute, vec![failed.origin.clone()]);
        env.origin = hop.to_string();
        env.failed_msg = Some(failed.msg.as_str().to_string());
        let mut orig = failed.clone();
        orig.blob = None;
        env.orig_msg = Some(Box::new(orig));
        env
    }

    /// Payload bytes regardless of mode.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match (&self.blob, &self.data) {
            (Some(blob), _) => blob.clone(),
            (None, Some(data)) => data.clone().into_bytes(),
            (None, None) => Vec::new(),
        }
    }

    /// Serialize for transmission, picking text or binary framing.
    pub fn to_frame(&self) -> Result<Frame, RouterError> {
        if self.binary.unwrap_or(false) && self.blob.is_some() {
            Ok(Frame::Binary(self.to_binary_frame()?))
        } else {
            Ok(Frame::Text(serde_json::to_string(self)?))
        }
    }

    /// Binary framing: header JSON with `data` set to the payload length,
    /// one NUL byte, then the payload.
    pub fn to_binary_frame(&self) -> Result<Vec<u8>, RouterError> {
        let payload = self.blob.as_deref().unwrap_or_default();
        let mut header = serde_json::to_value(self)?;
        header["data"] = serde_json::Value::from(payload.len());
        let mut out = serde_json::to_vec(&header)?;
        out.push(0);
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Parse a binary frame back into an envelope with `blob` populated.
    pub fn from_binary_frame(frame: &[u8]) -> Result<Envelope, RouterError> {
        let nul = frame
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| RouterError::MalformedFrame("missing NUL separator".to_string()))?;
        let mut header: serde_json::Value = serde_json::from_slice(&frame[..nul])?;
        let len = header
            .get("data")
            .and_then(length_field)
            .ok_or_else(|| RouterError::MalformedFrame("missing payload length".to_string()))?;
        let body = &frame[nul + 1..];
        if body.len() < len {
            return Err(RouterError::MalformedFrame(format!(
                "payload truncated: expected {len} bytes, got {}",
                body.len()
            )));
        }
        if let Some(obj) = header.as_object_mut() {
            obj.remove("data");
        }
        let mut env: Envelope = serde_json::from_value(header)?;
        env.blob = Some(body[..len].to_vec());
        Ok(env)
    }
}

/// Accept the length either as a JSON number or a decimal string.
fn length_field(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// What a local subscriber callback receives on each delivery.
#[derive(Debug, Clone)]
pub struct Payload {
    pub topic: String,
    /// Return path to the publishing node, usable as a message target.
    pub origin: String,
    pub data: Vec<u8>,
    pub content_type: String,
    pub persisted: bool,
    /// Set when the publication was injected via `publish_at` from a third
    /// node: the injector's path relative to the topic owner.
    pub remote_origin: Option<String>,
}

impl Payload {
    pub fn from_envelope(env: &Envelope) -> Self {
        Self {
            topic: env.topic.clone().unwrap_or_default(),
            origin: env.origin.clone(),
            data: env.payload_bytes(),
            content_type: env.r#type.clone().unwrap_or_default(),
            persisted: env.persisted.unwrap_or(false),
            remote_origin: env.remote_origin.clone(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Why a subscription could not be established or served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFailure {
    /// The subscription path that failed.
    pub path: String,
    /// Kind of the message that bounced (`subscribe`, `publish`, ...).
    pub failed_msg: String,
}

/// A peer's answer to a topology query, also served verbatim on `/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyInfo {
    #[serde(rename = "selfId")]
    pub self_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub version: String,
    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub children: Vec<String>,
    pub topics: Vec<TopicInfo>,
    /// Path to the responding node, relative to the querier.
    #[serde(skip)]
    pub origin: String,
}

impl TopologyInfo {
    pub fn from_envelope(env: &Envelope) -> Self {
        Self {
            self_id: env.self_id.clone().unwrap_or_default(),
            name: env.name.clone().unwrap_or_default(),
            node_type: env.r#type.clone().unwrap_or_default(),
            version: env.version.clone().unwrap_or_default(),
            parent_id: env.parent_id.clone(),
            children: env.children.clone().unwrap_or_default(),
            topics: env.topics.clone().unwrap_or_default(),
            origin: env.origin.clone(),
        }
    }

    pub fn into_envelope(self, target: &str, request: &str) -> Envelope {
        let mut env = Envelope::base(MsgKind::QueryResponse, vec![target.to_string()]);
        env.request = Some(request.to_string());
        env.self_id = Some(self.self_id);
        env.name = Some(self.name);
        env.r#type = Some(self.node_type);
        env.version = Some(self.version);
        env.parent_id = self.parent_id;
        env.children = Some(self.children);
        env.topics = Some(self.topics);
        env
    }
}

/// Out-of-band authentication control frame, exchanged before any routed
/// message on a new connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    pub control: String,
    #[serde(rename = "selfId")]
    pub self_id: String,
    pub token: String,
}

impl ControlFrame {
    pub fn authenticate(self_id: &str, token: &str) -> Self {
        Self {
            control: "authenticate".to_string(),
            self_id: self_id.to_string(),
            token: token.to_string(),
        }
    }
}
