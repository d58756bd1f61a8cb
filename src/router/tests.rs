use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::config::Settings;
use crate::connection::{ConnectionId, Frame};
use crate::router::engine::{normalize_path, split_first_hop, subscription_key};
use crate::router::{
    Envelope, MANAGEMENT_TOPIC, Node, Payload, RouteFailure, SubscriberCallback, TopologyInfo,
};
use crate::utils::error::RouterError;

fn settings(self_id: &str) -> Settings {
    let mut settings = Settings::default();
    settings.node.self_id = self_id.to_string();
    settings
}

type DeliveryLog = Arc<Mutex<Vec<Result<Payload, RouteFailure>>>>;

fn recorder() -> (SubscriberCallback, DeliveryLog) {
    let log: DeliveryLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: SubscriberCallback =
        Arc::new(move |delivery| sink.lock().unwrap().push(delivery));
    (callback, log)
}

fn query_recorder() -> (
    Box<dyn FnOnce(TopologyInfo) + Send>,
    Arc<Mutex<Vec<TopologyInfo>>>,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    (Box::new(move |info| sink.lock().unwrap().push(info)), log)
}

/// An in-memory parent/child link. Frames queued by either router are moved
/// across by `pump`, so routing stays deterministic and synchronous.
struct Link {
    parent: Node,
    child: Node,
    /// Connection id on the parent for the inbound child link.
    down_conn: ConnectionId,
    /// Connection id on the child for its uplink.
    up_conn: ConnectionId,
    to_child: UnboundedReceiver<Frame>,
    to_parent: UnboundedReceiver<Frame>,
}

fn link(parent: &Node, child: &Node) -> Link {
    let (down_tx, to_child) = mpsc::unbounded_channel();
    let (up_tx, to_parent) = mpsc::unbounded_channel();
    let down_conn = parent.connection_opened(down_tx, false);
    let up_conn = child.connection_opened(up_tx, true);
    let mut link = Link {
        parent: parent.clone(),
        child: child.clone(),
        down_conn,
        up_conn,
        to_child,
        to_parent,
    };
    // header-based handshake; the parent's control frame echo authenticates
    // the uplink on the child side once pumped
    link.parent
        .authenticate(link.down_conn, &link.child.self_id(), "")
        .unwrap();
    link.pump();
    link
}

impl Link {
    fn pump(&mut self) -> bool {
        let mut moved = false;
        loop {
            let mut step = false;
            while let Ok(frame) = self.to_child.try_recv() {
                self.child.handle_frame(self.up_conn, frame);
                step = true;
            }
            while let Ok(frame) = self.to_parent.try_recv() {
                self.parent.handle_frame(self.down_conn, frame);
                step = true;
            }
            if !step {
                return moved;
            }
            moved = true;
        }
    }
}

fn pump_all(links: &mut [&mut Link]) {
    loop {
        let mut moved = false;
        for link in links.iter_mut() {
            moved |= link.pump();
        }
        if !moved {
            return;
        }
    }
}

// ---- local registry and pub/sub ----------------------------------------

#[test]
fn test_publish_to_unknown_topic_returns_false() {
    let node = Node::new(&settings("solo"));
    assert!(!node.publish("nope", b"x", false, false));
}

#[test]
fn test_local_subscribe_and_publish() {
    let node = Node::new(&settings("solo"));
    node.register_topic("weather", "application/json", None);
    let (callback, log) = recorder();
    node.subscribe("weather", callback).unwrap();

    assert!(node.publish("weather", b"{\"temp\":21}", false, false));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.topic, "weather");
    assert_eq!(payload.text(), "{\"temp\":21}");
    assert_eq!(payload.origin, ".");
    assert_eq!(payload.content_type, "application/json");
    assert!(!payload.persisted);
}

#[test]
fn test_subscribe_to_unknown_local_topic_fails_fast() {
    let node = Node::new(&settings("solo"));
    let (callback, log) = recorder();
    let result = node.subscribe("nope", callback);
    assert!(matches!(result, Err(RouterError::UnknownTopic(_))));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_persisted_payload_replayed_to_late_subscriber() {
    let node = Node::new(&settings("solo"));
    node.register_topic("weather", "application/json", None);
    assert!(node.publish("weather", b"sunny", true, false));

    let (callback, log) = recorder();
    node.subscribe("weather", callback).unwrap();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "sunny");
    assert!(payload.persisted);
}

#[test]
fn test_persisted_payload_replayed_to_second_subscriber() {
    let node = Node::new(&settings("solo"));
    node.register_topic("weather", "application/json", None);
    let (cb1, _log1) = recorder();
    node.subscribe("weather", cb1).unwrap();
    assert!(node.publish("weather", b"{\"temp\":72}", true, false));

    // the second subscription catches up without a new publish
    let (cb2, log2) = recorder();
    node.subscribe("weather", cb2).unwrap();
    let log2 = log2.lock().unwrap();
    assert_eq!(log2.len(), 1);
    let payload = log2[0].as_ref().unwrap();
    assert_eq!(payload.text(), "{\"temp\":72}");
    assert!(payload.persisted);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let node = Node::new(&settings("solo"));
    node.register_topic("weather", "application/json", None);
    let (callback, log) = recorder();
    let id = node.subscribe("weather", callback).unwrap();

    assert!(node.unsubscribe("weather", Some(id)));
    assert!(!node.unsubscribe("weather", Some(id)));
    node.publish("weather", b"rain", false, false);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(node.topic_subscribers("weather").unwrap().len(), 0);
}

#[test]
fn test_normalized_paths_share_a_subscription() {
    let node = Node::new(&settings("solo"));
    node.register_topic("weather", "application/json", None);
    let (callback, _log) = recorder();
    node.subscribe("./weather", callback).unwrap();
    // bare id and "./" prefixed id are the same subscription
    assert!(node.unsubscribe("weather", None));
}

#[test]
fn test_management_topic_exists_from_birth() {
    let node = Node::new(&settings("solo"));
    assert_eq!(
        node.topic_content_type(MANAGEMENT_TOPIC).as_deref(),
        Some("application/json")
    );
    let info = node.info();
    assert!(info.topics.iter().any(|t| t.topic_id == MANAGEMENT_TOPIC));
}

// ---- parent/child routing ----------------------------------------------

#[test]
fn test_child_subscribes_to_parent_topic() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("log", "text/plain", None);
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    child.subscribe("../log", callback).unwrap();
    link.pump();
    assert_eq!(
        parent.topic_subscribers("log").unwrap(),
        vec!["C/.".to_string()]
    );

    parent.publish("log", b"hello", false, false);
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "hello");
    assert_eq!(payload.topic, "log");
    assert_eq!(payload.origin, "../.");
}

#[test]
fn test_parent_subscribes_to_child_topic() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    child.register_topic("ack", "text/plain", None);
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    parent.subscribe("C/ack", callback).unwrap();
    link.pump();
    assert_eq!(
        child.topic_subscribers("ack").unwrap(),
        vec!["../.".to_string()]
    );

    child.publish("ack", b"done", false, false);
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "done");
    assert_eq!(payload.origin, "C/.");
}

#[test]
fn test_second_subscription_shares_the_remote_one() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("log", "text/plain", None);
    let mut link = link(&parent, &child);

    let (cb1, log1) = recorder();
    let (cb2, log2) = recorder();
    child.subscribe("../log", cb1).unwrap();
    child.subscribe("../log", cb2).unwrap();
    link.pump();
    // one subscriber address upstream, two local callbacks
    assert_eq!(parent.topic_subscribers("log").unwrap().len(), 1);

    parent.publish("log", b"x", false, false);
    link.pump();
    assert_eq!(log1.lock().unwrap().len(), 1);
    assert_eq!(log2.lock().unwrap().len(), 1);
}

#[test]
fn test_grandparent_subscription_crosses_two_links() {
    let root = Node::new(&settings("R"));
    let mid = Node::new(&settings("M"));
    let leaf = Node::new(&settings("L"));
    leaf.register_topic("t", "text/plain", None);
    let mut upper = link(&root, &mid);
    let mut lower = link(&mid, &leaf);

    let (callback, log) = recorder();
    root.subscribe("M/L/t", callback).unwrap();
    pump_all(&mut [&mut upper, &mut lower]);
    assert_eq!(
        leaf.topic_subscribers("t").unwrap(),
        vec!["../../.".to_string()]
    );

    leaf.publish("t", b"deep", false, false);
    pump_all(&mut [&mut upper, &mut lower]);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "deep");
    // the origin leads straight back to the publisher
    assert_eq!(payload.origin, "M/L/.");
}

#[test]
fn test_send_reaches_a_remote_subscriber_directly() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("log", "text/plain", None);
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    child.subscribe("../log", callback).unwrap();
    link.pump();

    // addressed to the one peer, not to the subscriber list
    assert!(parent.send("C", "log", b"direct", false));
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].as_ref().unwrap().text(), "direct");
}

#[test]
fn test_publish_at_republishes_at_the_owner() {
    let parent = Node::new(&settings("P"));
    let cam = Node::new(&settings("cam"));
    let viewer = Node::new(&settings("viewer"));
    cam.register_topic("frame", "text/plain", None);
    let mut cam_link = link(&parent, &cam);
    let mut viewer_link = link(&parent, &viewer);

    let (callback, log) = recorder();
    cam.subscribe("frame", callback).unwrap();

    assert!(viewer.publish_at("../cam/frame", b"jpeg", false, false));
    pump_all(&mut [&mut cam_link, &mut viewer_link]);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "jpeg");
    // the injector's path relative to the owner rides along
    assert_eq!(payload.remote_origin.as_deref(), Some("../viewer/."));
}

#[test]
fn test_binary_publish_crosses_the_link_intact() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("frame", "image/jpeg", None);
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    child.subscribe("../frame", callback).unwrap();
    link.pump();

    let bytes = vec![0xffu8, 0xd8, 0x00, 0x07, 0xff];
    parent.publish("frame", &bytes, false, true);
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.data, bytes);
    assert_eq!(payload.content_type, "image/jpeg");
}

#[test]
fn test_persisted_payload_replayed_across_the_link() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("weather", "application/json", None);
    parent.publish("weather", b"sunny", true, false);
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    child.subscribe("../weather", callback).unwrap();
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let payload = log[0].as_ref().unwrap();
    assert_eq!(payload.text(), "sunny");
    assert!(payload.persisted);
}

#[test]
fn test_persisted_replay_reaches_second_remote_subscriber() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("weather", "application/json", None);
    let mut link = link(&parent, &child);

    let (cb1, _log1) = recorder();
    child.subscribe("../weather", cb1).unwrap();
    link.pump();
    parent.publish("weather", b"sunny", true, false);
    link.pump();

    let (cb2, log2) = recorder();
    child.subscribe("../weather", cb2).unwrap();
    link.pump();
    // the owner still holds one address for this path
    assert_eq!(parent.topic_subscribers("weather").unwrap().len(), 1);
    let log2 = log2.lock().unwrap();
    assert_eq!(log2.len(), 1);
    let payload = log2[0].as_ref().unwrap();
    assert_eq!(payload.text(), "sunny");
    assert!(payload.persisted);
}

// ---- failure paths -------------------------------------------------------

#[test]
fn test_subscribe_with_no_parent_fails_with_route_failure() {
    let node = Node::new(&settings("orphan"));
    let (callback, log) = recorder();
    node.subscribe("../log", callback).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let failure = log[0].as_ref().unwrap_err();
    assert_eq!(failure.path, "../log");
    assert_eq!(failure.failed_msg, "subscribe");
}

#[test]
fn test_subscribe_to_unknown_remote_topic_fails_via_bounce() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    let mut link = link(&parent, &child);

    let (callback, log) = recorder();
    child.subscribe("../nope", callback).unwrap();
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let failure = log[0].as_ref().unwrap_err();
    assert_eq!(failure.path, "../nope");
    assert_eq!(failure.failed_msg, "subscribe");
}

#[test]
fn test_unreachable_subscriber_pruned_on_publish() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    let changes: Arc<Mutex<Vec<(String, String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    parent.register_topic(
        "t",
        "text/plain",
        Some(Arc::new(move |topic, addr, added| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), addr.to_string(), added));
        })),
    );
    let mut link = link(&parent, &child);

    // a subscriber address pointing at a child that does not exist
    let ghost = json!({"msg": "subscribe", "origin": "ghost/.", "targets": ["t"]});
    parent.handle_frame(link.down_conn, Frame::Text(ghost.to_string()));
    assert_eq!(
        parent.topic_subscribers("t").unwrap(),
        vec!["ghost/.".to_string()]
    );

    parent.publish("t", b"x", false, false);
    link.pump();
    assert!(parent.topic_subscribers("t").unwrap().is_empty());
    let changes = changes.lock().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0], ("t".to_string(), "ghost/.".to_string(), true));
    assert_eq!(changes[1], ("t".to_string(), "ghost/.".to_string(), false));
}

#[test]
fn test_peer_close_drops_its_subscriptions() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    parent.register_topic("log", "text/plain", None);
    let mut link = link(&parent, &child);

    let (callback, _log) = recorder();
    child.subscribe("../log", callback).unwrap();
    link.pump();
    assert_eq!(parent.topic_subscribers("log").unwrap().len(), 1);

    let (events, event_log) = recorder();
    parent.subscribe(MANAGEMENT_TOPIC, events).unwrap();
    parent.handle_frame(link.down_conn, Frame::Close(None));
    assert!(parent.topic_subscribers("log").unwrap().is_empty());

    let event_log = event_log.lock().unwrap();
    assert_eq!(event_log.len(), 1);
    let event: serde_json::Value =
        serde_json::from_slice(&event_log[0].as_ref().unwrap().data).unwrap();
    assert_eq!(event["event"], "disconnected");
    assert_eq!(event["selfId"], "C");
}

// ---- connection lifecycle ------------------------------------------------

#[test]
fn test_connection_events_on_the_management_topic() {
    let parent = Node::new(&settings("P"));
    let (events, event_log) = recorder();
    parent.subscribe(MANAGEMENT_TOPIC, events).unwrap();

    let child = Node::new(&settings("C"));
    let mut link = link(&parent, &child);
    link.pump();

    let event_log = event_log.lock().unwrap();
    assert_eq!(event_log.len(), 1);
    let event: serde_json::Value =
        serde_json::from_slice(&event_log[0].as_ref().unwrap().data).unwrap();
    assert_eq!(event["event"], "connected");
    assert_eq!(event["selfId"], "C");
    assert_eq!(event["parent"], false);
}

#[test]
fn test_duplicate_identity_evicts_the_old_connection() {
    let parent = Node::new(&settings("P"));
    let (old_tx, mut old_rx) = mpsc::unbounded_channel();
    let (new_tx, _new_rx) = mpsc::unbounded_channel();

    let old_conn = parent.connection_opened(old_tx, false);
    parent.authenticate(old_conn, "C", "").unwrap();
    while old_rx.try_recv().is_ok() {} // drain the handshake echo

    let new_conn = parent.connection_opened(new_tx, false);
    parent.authenticate(new_conn, "C", "").unwrap();

    let frame = old_rx.try_recv().unwrap();
    assert_eq!(frame, Frame::Close(Some("superseded".to_string())));
    assert_eq!(parent.info().children, vec!["C".to_string()]);
}

#[test]
fn test_frames_buffered_until_authentication_completes() {
    let parent = Node::new(&settings("P"));
    parent.register_topic("t", "text/plain", None);
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = parent.connection_opened(tx, false);

    let early = json!({"msg": "subscribe", "origin": "C/.", "targets": ["t"]});
    parent.handle_frame(conn, Frame::Text(early.to_string()));
    assert!(parent.topic_subscribers("t").unwrap().is_empty());

    // replayed in order once the peer is accepted
    parent.authenticate(conn, "C", "").unwrap();
    assert_eq!(
        parent.topic_subscribers("t").unwrap(),
        vec!["C/.".to_string()]
    );
}

#[test]
fn test_validator_rejects_unknown_token() {
    let mut settings = settings("P");
    settings.node.token = "own-token".to_string();
    let node = Node::with_validator(&settings, Arc::new(|_, token| token == "guest-token"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = node.connection_opened(tx, false);
    let result = node.authenticate(conn, "C", "wrong");
    assert!(matches!(result, Err(RouterError::AuthRejected(_))));
    assert_eq!(
        rx.try_recv().unwrap(),
        Frame::Close(Some("authentication failed".to_string()))
    );
}

#[test]
fn test_own_token_always_authenticates() {
    let mut settings = settings("P");
    settings.node.token = "own-token".to_string();
    let node = Node::with_validator(&settings, Arc::new(|_, _| false));

    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = node.connection_opened(tx, false);
    assert!(node.authenticate(conn, "C", "own-token").is_ok());
    assert_eq!(node.info().children, vec!["C".to_string()]);
}

#[test]
fn test_duplicate_control_frame_is_a_no_op() {
    let parent = Node::new(&settings("P"));
    let (events, event_log) = recorder();
    parent.subscribe(MANAGEMENT_TOPIC, events).unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = parent.connection_opened(tx, false);
    parent.authenticate(conn, "C", "").unwrap();
    parent.authenticate(conn, "C", "").unwrap();
    assert_eq!(event_log.lock().unwrap().len(), 1);
}

// ---- topology queries ----------------------------------------------------

#[test]
fn test_query_local_answers_own_info() {
    let node = Node::new(&settings("solo"));
    let (callback, log) = query_recorder();
    node.query(".", callback);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].self_id, "solo");
    assert_eq!(log[0].origin, ".");
}

#[test]
fn test_query_parent_topology() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    let mut link = link(&parent, &child);

    let (callback, log) = query_recorder();
    child.query("..", callback);
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    let info = &log[0];
    assert_eq!(info.self_id, "P");
    assert!(info.children.contains(&"C".to_string()));
    assert_eq!(info.origin, "../.");
}

#[test]
fn test_query_accepts_a_trailing_slash() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    let mut link = link(&parent, &child);

    let (callback, log) = query_recorder();
    child.query("../", callback);
    link.pump();
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].self_id, "P");
}

#[test]
fn test_query_without_route_is_abandoned() {
    let node = Node::new(&settings("orphan"));
    let (callback, log) = query_recorder();
    node.query("..", callback);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_child_sees_parent_after_handshake() {
    let parent = Node::new(&settings("P"));
    let child = Node::new(&settings("C"));
    assert!(!child.has_parent());
    let _link = link(&parent, &child);
    assert!(child.has_parent());
    assert_eq!(child.info().parent_id.as_deref(), Some("P"));
}

// ---- path helpers --------------------------------------------------------

#[test]
fn test_split_first_hop() {
    assert_eq!(
        split_first_hop("a/b/c"),
        ("a".to_string(), "b/c".to_string())
    );
    assert_eq!(
        split_first_hop("../log"),
        ("..".to_string(), "log".to_string())
    );
    assert_eq!(split_first_hop("log"), (".".to_string(), "log".to_string()));
    assert_eq!(split_first_hop("."), (".".to_string(), ".".to_string()));
}

#[test]
fn test_subscription_key() {
    assert_eq!(subscription_key(".", "log"), "log");
    assert_eq!(subscription_key("../.", "log"), "../log");
    assert_eq!(subscription_key("M/L/.", "t"), "M/L/t");
    assert_eq!(subscription_key("C", "t"), "C/t");
}

#[test]
fn test_normalize_path() {
    assert_eq!(normalize_path("./log"), "log");
    assert_eq!(normalize_path("././a/b"), "a/b");
    assert_eq!(normalize_path("../log"), "../log");
    assert_eq!(normalize_path("../"), "..");
    assert_eq!(normalize_path("weather/"), "weather");
}

// ---- wire format ---------------------------------------------------------

#[test]
fn test_envelope_wire_field_names() {
    let env = Envelope::publish(
        "frame",
        "image/jpeg",
        b"x",
        true,
        false,
        vec!["C/.".to_string()],
        None,
    );
    let value = serde_json::to_value(&env).unwrap();
    assert_eq!(value["msg"], "publish");
    assert_eq!(value["type"], "image/jpeg");
    assert_eq!(value["topic"], "frame");
    assert_eq!(value["targets"][0], "C/.");
    assert_eq!(value["persisted"], true);

    let info = Node::new(&settings("n")).info();
    let value = serde_json::to_value(info.into_envelope(".", "7")).unwrap();
    assert_eq!(value["msg"], "query_response");
    assert_eq!(value["selfId"], "n");
    assert_eq!(value["request"], "7");
    assert!(value.get("parentId").is_none());
}

#[test]
fn test_binary_frame_round_trip() {
    let bytes = vec![1u8, 0, 2, 0, 3];
    let env = Envelope::publish(
        "frame",
        "application/octet-stream",
        &bytes,
        false,
        true,
        vec![".".to_string()],
        None,
    );
    let framed = env.to_binary_frame().unwrap();
    let parsed = Envelope::from_binary_frame(&framed).unwrap();
    assert_eq!(parsed.blob.as_deref(), Some(bytes.as_slice()));
    assert_eq!(parsed.topic.as_deref(), Some("frame"));
    assert_eq!(parsed.msg, env.msg);
}

#[test]
fn test_truncated_binary_frame_is_rejected() {
    let env = Envelope::publish(
        "frame",
        "application/octet-stream",
        &[1, 2, 3, 4],
        false,
        true,
        vec![".".to_string()],
        None,
    );
    let mut framed = env.to_binary_frame().unwrap();
    framed.truncate(framed.len() - 2);
    assert!(matches!(
        Envelope::from_binary_frame(&framed),
        Err(RouterError::MalformedFrame(_))
    ));
}

#[test]
fn test_binary_frame_accepts_string_length() {
    let mut header = serde_json::to_value(Envelope::subscribe("t")).unwrap();
    header["msg"] = serde_json::Value::from("publish");
    header["topic"] = serde_json::Value::from("t");
    header["binary"] = serde_json::Value::from(true);
    header["data"] = serde_json::Value::from("3");
    let mut framed = serde_json::to_vec(&header).unwrap();
    framed.push(0);
    framed.extend_from_slice(&[9, 9, 9]);
    let parsed = Envelope::from_binary_frame(&framed).unwrap();
    assert_eq!(parsed.blob.as_deref(), Some([9u8, 9, 9].as_slice()));
}
