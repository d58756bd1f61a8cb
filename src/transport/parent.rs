//! Outbound uplink: dial the parent node's `/stream` endpoint and keep the
//! link alive, reconnecting with a fixed delay whenever it drops.
//!
//! We identify ourselves via request headers; the parent identifies itself
//! with an `authenticate` control frame once it accepts the upgrade, which
//! the engine handles like any other inbound frame.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::protocol::Message as WsMessage;

use crate::config::Settings;
use crate::connection::Frame;
use crate::router::Node;
use crate::utils::error::RouterError;

/// Keep the parent link up for the lifetime of the node. Returns immediately
/// when no parent is configured.
pub async fn maintain_parent_link(node: Node, settings: Settings) {
    let Some(url) = settings.network.parent_url.clone() else {
        return;
    };
    let reconnect = Duration::from_secs(settings.network.reconnect_secs.max(1));
    loop {
        match run_link(&node, &settings, &url).await {
            Ok(()) => info!("parent link to {} closed", url),
            Err(e) => warn!("parent link to {} failed: {}", url, e),
        }
        tokio::time::sleep(reconnect).await;
    }
}

/// One connection attempt: dial, pump frames both ways until either side
/// closes, tear down.
async fn run_link(node: &Node, settings: &Settings, url: &str) -> Result<(), RouterError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RouterError::Transport(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        "selfId",
        node.self_id()
            .parse()
            .map_err(|_| RouterError::Transport("selfId not header safe".to_string()))?,
    );
    headers.insert(
        "token",
        settings
            .node
            .token
            .parse()
            .map_err(|_| RouterError::Transport("token not header safe".to_string()))?,
    );
    headers.insert(
        "instance",
        node.instance_id()
            .parse()
            .map_err(|_| RouterError::Transport("instance id not header safe".to_string()))?,
    );

    let (socket, _) = connect_async(request)
        .await
        .map_err(|e| RouterError::Transport(e.to_string()))?;
    info!("connected to parent at {}", url);

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let conn_id = node.connection_opened(tx, true);

    let (mut sink, mut stream) = socket.split();
    let keepalive = Duration::from_secs(settings.network.keepalive_secs.max(1));

    let send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keepalive);
        ticker.tick().await; // first tick is immediate
        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if sink.send(frame.into_ws()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let ts = chrono::Utc::now().timestamp_millis().to_string();
                    if sink.send(WsMessage::Ping(ts.into_bytes().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut result = Ok(());
    loop {
        match stream.next().await {
            Some(Ok(msg)) => {
                if let Some(frame) = Frame::from_ws(msg) {
                    let closing = matches!(frame, Frame::Close(_));
                    node.handle_frame(conn_id, frame);
                    if closing {
                        break;
                    }
                }
            }
            Some(Err(e)) => {
                result = Err(RouterError::Transport(e.to_string()));
                break;
            }
            None => break,
        }
    }

    node.connection_closed(conn_id);
    send_task.abort();
    result
}
