//! Inbound transport: the streaming upgrade endpoint for child nodes, the
//! `/info` identity endpoint, the `/topics` REST bridge and an optional
//! static-content passthrough.
//!
//! Children authenticate via request headers on the upgrade (`selfId`,
//! `token`, `instance`); the `instance` header guards against a node dialing
//! its own listener. Everything else is gated by HTTP Basic auth when REST
//! credentials are configured.

use std::time::Duration;

use axum::Router as HttpRouter;
use axum::extract::ws::{self, Message as AxMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::config::Settings;
use crate::connection::Frame;
use crate::router::Node;
use crate::transport::bridge::{self, authorized, unauthorized};
use crate::utils::error::RouterError;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) node: Node,
    pub(crate) settings: Settings,
}

/// Build the HTTP application for one node.
pub fn app(node: Node, settings: Settings) -> HttpRouter {
    let state = ServerState {
        node,
        settings: settings.clone(),
    };

    let mut app = HttpRouter::new()
        .route("/stream", get(stream_upgrade))
        .route("/info", get(info_endpoint))
        .route(
            "/topics/:id",
            get(bridge::get_topic)
                .post(bridge::post_topic)
                .put(bridge::post_topic),
        );

    if let Some(web_root) = &settings.server.web_root {
        let static_router = HttpRouter::new()
            .fallback_service(ServeDir::new(web_root))
            .layer(middleware::from_fn_with_state(state.clone(), require_auth));
        app = app.fallback_service(static_router);
    }

    app.with_state(state)
}

/// Bind and serve until the listener or runtime goes away.
pub async fn serve(node: Node, settings: Settings, listener: TcpListener) -> Result<(), RouterError> {
    info!(
        "listening on {} (selfId '{}')",
        listener.local_addr()?,
        node.self_id()
    );
    axum::serve(listener, app(node, settings))
        .await
        .map_err(|e| RouterError::Transport(e.to_string()))
}

async fn require_auth(State(state): State<ServerState>, req: Request, next: Next) -> Response {
    if authorized(&state.settings, req.headers()) {
        next.run(req).await
    } else {
        unauthorized()
    }
}

async fn info_endpoint(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    if !authorized(&state.settings, &headers) {
        return unauthorized();
    }
    Json(state.node.info()).into_response()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

async fn stream_upgrade(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let (Some(self_id), Some(token)) = (header_str(&headers, "selfId"), header_str(&headers, "token"))
    else {
        return (StatusCode::BAD_REQUEST, "missing selfId or token header").into_response();
    };
    if header_str(&headers, "instance").as_deref() == Some(state.node.instance_id().as_str()) {
        warn!("rejecting connection from our own instance");
        return (StatusCode::CONFLICT, "refusing connection to self").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(state, socket, self_id, token))
}

async fn handle_socket(state: ServerState, socket: WebSocket, self_id: String, token: String) {
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let conn_id = state.node.connection_opened(tx, false);

    // Header-based authentication. On rejection the engine has already queued
    // a close frame and dropped the connection; the loops below drain it and
    // exit as soon as the channel closes.
    if let Err(e) = state.node.authenticate(conn_id, &self_id, &token) {
        warn!("connection {} rejected: {}", conn_id, e);
    }

    let (mut sink, mut stream) = socket.split();
    let keepalive = Duration::from_secs(state.settings.network.keepalive_secs.max(1));

    let send_task = tokio::spawn(async move {
        let mut rx = rx;
        let mut ticker = tokio::time::interval(keepalive);
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if sink.send(to_axum(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let ts = chrono::Utc::now().timestamp_millis().to_string();
                    if sink.send(AxMessage::Ping(ts.into_bytes())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        if let Some(frame) = from_axum(msg) {
            let closing = matches!(frame, Frame::Close(_));
            state.node.handle_frame(conn_id, frame);
            if closing {
                break;
            }
        }
    }

    state.node.connection_closed(conn_id);
    send_task.abort();
}

fn from_axum(msg: AxMessage) -> Option<Frame> {
    match msg {
        AxMessage::Text(t) => Some(Frame::Text(t)),
        AxMessage::Binary(b) => Some(Frame::Binary(b)),
        AxMessage::Ping(p) => Some(Frame::Ping(p)),
        AxMessage::Pong(p) => Some(Frame::Pong(p)),
        AxMessage::Close(c) => Some(Frame::Close(c.map(|f| f.reason.into_owned()))),
    }
}

fn to_axum(frame: Frame) -> AxMessage {
    match frame {
        Frame::Text(t) => AxMessage::Text(t),
        Frame::Binary(b) => AxMessage::Binary(b),
        Frame::Ping(p) => AxMessage::Ping(p),
        Frame::Pong(p) => AxMessage::Pong(p),
        Frame::Close(reason) => AxMessage::Close(reason.map(|r| ws::CloseFrame {
            code: ws::close_code::NORMAL,
            reason: r.into(),
        })),
    }
}
