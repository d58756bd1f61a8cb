//! REST bridge: topics over plain HTTP for clients that cannot speak the
//! streaming protocol.
//!
//! `GET /topics/{id}` opens a streaming subscription whose response framing
//! follows the topic's content type: multipart for images, server-sent
//! events for text and JSON, raw chunks otherwise. `POST`/`PUT` publish one
//! payload via the same `publish_at` path any remote node would use.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Settings;
use crate::router::{Node, Payload, SubscriberCallback, SubscriptionId};
use crate::transport::server::ServerState;

const MULTIPART_BOUNDARY: &str = "treebus-frame";

/// Check the `Authorization: Basic` header against configured credentials.
/// With no credentials configured every request passes.
pub(crate) fn authorized(settings: &Settings, headers: &HeaderMap) -> bool {
    let (Some(username), Some(password)) = (&settings.rest.username, &settings.rest.password)
    else {
        return true;
    };
    let expected = format!("Basic {}", BASE64.encode(format!("{username}:{password}")));
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

pub(crate) fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"treebus\"")],
        "unauthorized",
    )
        .into_response()
}

fn flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// How payloads are framed onto the HTTP response body.
#[derive(Clone, Copy, PartialEq)]
enum StreamMode {
    Multipart,
    EventStream,
    Raw,
}

fn stream_mode(content_type: &str) -> StreamMode {
    if content_type.starts_with("image/") {
        StreamMode::Multipart
    } else if content_type.starts_with("text/") || content_type == "application/json" {
        StreamMode::EventStream
    } else {
        StreamMode::Raw
    }
}

fn encode_chunk(mode: StreamMode, content_type: &str, payload: &Payload) -> Bytes {
    match mode {
        StreamMode::Multipart => {
            let mut chunk = format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
                payload.data.len()
            )
            .into_bytes();
            chunk.extend_from_slice(&payload.data);
            chunk.extend_from_slice(b"\r\n");
            Bytes::from(chunk)
        }
        StreamMode::EventStream => {
            let text = payload.text().replace('\n', "\ndata: ");
            Bytes::from(format!("data: {text}\n\n"))
        }
        StreamMode::Raw => Bytes::from(payload.data.clone()),
    }
}

/// Unsubscribes when the response stream is dropped, covering both graceful
/// client disconnects and transport errors.
struct SubscriptionGuard {
    node: Node,
    path: String,
    owner: SubscriptionId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!("bridge subscriber for '{}' gone", self.path);
        self.node.unsubscribe(&self.path, Some(self.owner));
    }
}

pub(crate) async fn get_topic(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state.settings, &headers) {
        return unauthorized();
    }
    let Some(content_type) = state.node.topic_content_type(&id) else {
        return (StatusCode::NOT_FOUND, "unknown topic").into_response();
    };

    let (tx, rx) = mpsc::unbounded_channel::<Payload>();
    let callback: SubscriberCallback = Arc::new(move |delivery| {
        if let Ok(payload) = delivery {
            let _ = tx.send(payload);
        }
    });
    let owner = match state.node.subscribe(&id, callback) {
        Ok(owner) => owner,
        Err(_) => return (StatusCode::NOT_FOUND, "unknown topic").into_response(),
    };
    let guard = SubscriptionGuard {
        node: state.node.clone(),
        path: id,
        owner,
    };

    let mode = stream_mode(&content_type);
    let chunk_type = content_type.clone();
    let body = Body::from_stream(stream::unfold(
        (rx, guard),
        move |(mut rx, guard)| {
            let chunk_type = chunk_type.clone();
            async move {
                let payload = rx.recv().await?;
                let chunk = encode_chunk(mode, &chunk_type, &payload);
                Some((Ok::<Bytes, Infallible>(chunk), (rx, guard)))
            }
        },
    ));

    let response_type = match mode {
        StreamMode::Multipart => {
            format!("multipart/x-mixed-replace; boundary={MULTIPART_BOUNDARY}")
        }
        StreamMode::EventStream => "text/event-stream".to_string(),
        StreamMode::Raw => content_type,
    };
    (
        [
            (header::CONTENT_TYPE, response_type.as_str()),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

pub(crate) async fn post_topic(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&state.settings, &headers) {
        return unauthorized();
    }
    if state.node.topic_content_type(&id).is_none() {
        return (StatusCode::NOT_FOUND, "unknown topic").into_response();
    }
    let persisted = flag(&headers, "persisted");
    let binary = flag(&headers, "binary");
    if state.node.publish_at(&id, &body, persisted, binary) {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "publish failed").into_response()
    }
}
