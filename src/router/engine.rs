//! Routing engine.
//!
//! Owns the topic registry, the connection table and the local subscription
//! table for one node of the overlay tree. All methods are synchronous and
//! designed to be held behind a lock (`Node` wraps this in `Arc<Mutex<..>>`);
//! nothing here blocks on I/O: outbound frames go into per-connection send
//! queues and local callback invocations are returned as `Dispatch` values to
//! be run after the lock is released.
//!
//! Addressing: a target path is consumed one hop per node. `.` terminates at
//! the current node, `..` resolves to the parent link, anything else to a
//! child by selfId. Forwarding up prepends our own selfId to `origin`;
//! forwarding down prepends `..`, so `origin` is always a valid return path
//! and no node needs topology knowledge beyond its direct links.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::connection::{Connection, ConnectionId, Frame};
use crate::router::message::{
    ControlFrame, Envelope, MsgKind, Payload, RouteFailure, TopicInfo, TopologyInfo,
};
use crate::router::topic::{SubscriberChangedCallback, Topic};
use crate::utils::error::RouterError;

/// Management topic carrying `connected`/`disconnected` peer events.
pub const MANAGEMENT_TOPIC: &str = "connections";

/// Invoked for each delivery on a local subscription. An `Err` means the
/// subscription itself failed (unknown topic at the owner, or no route).
pub type SubscriberCallback = Arc<dyn Fn(Result<Payload, RouteFailure>) + Send + Sync>;

/// Invoked once with the decoded answer to a topology query.
pub type QueryCallback = Box<dyn FnOnce(TopologyInfo) + Send>;

/// Delegated token check for peers presenting a token other than our own.
pub type TokenValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Identifier for one local subscription, used to unsubscribe selectively.
pub type SubscriptionId = u64;

struct LocalSubscription {
    id: SubscriptionId,
    callback: SubscriberCallback,
}

/// A callback invocation produced while the router lock was held, to be run
/// after release. Keeps subscriber code from re-entering the router while it
/// is mid-mutation.
pub(crate) enum Dispatch {
    Deliver(SubscriberCallback, Result<Payload, RouteFailure>),
    QueryAnswer(QueryCallback, TopologyInfo),
    SubscriberChanged(SubscriberChangedCallback, String, String, bool),
}

impl Dispatch {
    pub(crate) fn run(self) {
        match self {
            Dispatch::Deliver(cb, result) => cb(result),
            Dispatch::QueryAnswer(cb, info) => cb(info),
            Dispatch::SubscriberChanged(cb, topic, address, added) => cb(&topic, &address, added),
        }
    }
}

pub struct Router {
    self_id: String,
    name: String,
    node_type: String,
    version: String,
    token: String,
    /// Random per-process id; guards against a node dialing itself.
    instance_id: String,

    topics: HashMap<String, Topic>,
    connections: HashMap<ConnectionId, Connection>,
    /// Authenticated children by selfId. The parent is tracked separately;
    /// it is addressed as `..`, never by name.
    children: HashMap<String, ConnectionId>,
    parent: Option<ConnectionId>,
    parent_self_id: Option<String>,

    subscriptions: HashMap<String, Vec<LocalSubscription>>,
    pending_queries: HashMap<u64, QueryCallback>,
    validator: Option<TokenValidator>,

    next_connection_id: ConnectionId,
    next_subscription_id: SubscriptionId,
    next_request_id: u64,
    dispatches: Vec<Dispatch>,
}

impl Router {
    pub fn new(settings: &Settings) -> Self {
        let mut router = Self {
            self_id: settings.node.self_id.clone(),
            name: settings.node.name.clone(),
            node_type: settings.node.node_type.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            token: settings.node.token.clone(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            topics: HashMap::new(),
            connections: HashMap::new(),
            children: HashMap::new(),
            parent: None,
            parent_self_id: None,
            subscriptions: HashMap::new(),
            pending_queries: HashMap::new(),
            validator: None,
            next_connection_id: 1,
            next_subscription_id: 1,
            next_request_id: 1,
            dispatches: Vec::new(),
        };
        router.register_topic(MANAGEMENT_TOPIC, "application/json", None);
        router
    }

    pub fn set_validator(&mut self, validator: TokenValidator) {
        self.validator = Some(validator);
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub(crate) fn take_dispatches(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.dispatches)
    }

    // ---- topic registry -------------------------------------------------

    /// Register or re-register a topic. Re-registering resets the content
    /// type and callback but keeps the subscriber list and persisted payload.
    pub fn register_topic(
        &mut self,
        id: &str,
        content_type: &str,
        on_subscriber_changed: Option<SubscriberChangedCallback>,
    ) {
        match self.topics.get_mut(id) {
            Some(topic) => {
                topic.content_type = content_type.to_string();
                topic.on_subscriber_changed = on_subscriber_changed;
            }
            None => {
                let mut topic = Topic::new(id, content_type);
                topic.on_subscriber_changed = on_subscriber_changed;
                self.topics.insert(id.to_string(), topic);
            }
        }
    }

    /// Idempotent; unknown ids are a no-op.
    pub fn unregister_topic(&mut self, id: &str) {
        self.topics.remove(id);
    }

    /// Publish to a locally registered topic. Returns false when the topic is
    /// unknown; an empty subscriber list is still a successful publish.
    pub fn publish(&mut self, id: &str, data: &[u8], persisted: bool, binary: bool) -> bool {
        let Some(topic) = self.topics.get_mut(id) else {
            warn!("publish to unknown topic '{}'", id);
            return false;
        };
        if persisted {
            topic.persisted = Some(data.to_vec());
            topic.persisted_binary = binary;
        }
        let targets = topic.subscribers.clone();
        let content_type = topic.content_type.clone();
        if targets.is_empty() {
            return true;
        }
        let env = Envelope::publish(id, &content_type, data, persisted, binary, targets, None);
        self.route(env);
        true
    }

    /// Point-to-point publish to one peer regardless of subscription state.
    /// The target is a path to the peer node (e.g. `"cam-node"` or `".."`).
    pub fn send(&mut self, target: &str, id: &str, data: &[u8], binary: bool) -> bool {
        let Some(topic) = self.topics.get(id) else {
            warn!("send on unknown topic '{}'", id);
            return false;
        };
        let target = normalize_path(target);
        if target.is_empty() {
            warn!("send with empty target");
            return false;
        }
        let target = if target == "." || target.ends_with("/.") {
            target
        } else {
            format!("{target}/.")
        };
        let env = Envelope::publish(
            id,
            &topic.content_type.clone(),
            data,
            false,
            binary,
            vec![target],
            None,
        );
        self.route(env);
        true
    }

    /// Publish into a topic hosted elsewhere, addressed by full path (the
    /// last hop is the topic id at its owner).
    pub fn publish_at(&mut self, path: &str, data: &[u8], persisted: bool, binary: bool) -> bool {
        let path = normalize_path(path);
        if path.is_empty() {
            warn!("publish_at with empty path");
            return false;
        }
        let env = Envelope::publish_at(&path, data, persisted, binary);
        self.route(env);
        true
    }

    // ---- local subscriptions -------------------------------------------

    /// Register a local callback for a path. Every call routes a `subscribe`
    /// message toward the topic owner: the owner de-duplicates the address,
    /// and replays its persisted payload so late subscribers catch up.
    /// Subscribing to an unregistered local topic fails immediately; remote
    /// failures arrive as an `Err` delivery.
    pub fn subscribe(
        &mut self,
        path: &str,
        callback: SubscriberCallback,
    ) -> Result<SubscriptionId, RouterError> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(RouterError::UnknownTopic(path));
        }
        if !path.contains('/') && !self.topics.contains_key(&path) {
            warn!("subscribe to unknown local topic '{}'", path);
            return Err(RouterError::UnknownTopic(path));
        }
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        self.subscriptions
            .entry(path.clone())
            .or_default()
            .push(LocalSubscription { id, callback });
        self.route(Envelope::subscribe(&path));
        Ok(id)
    }

    /// Remove local subscriptions for a path: one when `owner` is given, all
    /// otherwise. When the last one goes, an `unsubscribe` message is sent
    /// toward the owner. Returns whether anything was removed.
    pub fn unsubscribe(&mut self, path: &str, owner: Option<SubscriptionId>) -> bool {
        let path = normalize_path(path);
        let Some(entry) = self.subscriptions.get_mut(&path) else {
            return false;
        };
        let before = entry.len();
        match owner {
            Some(id) => entry.retain(|s| s.id != id),
            None => entry.clear(),
        }
        let removed = entry.len() != before;
        if entry.is_empty() {
            self.subscriptions.remove(&path);
            if removed {
                self.route(Envelope::unsubscribe(&path));
            }
        }
        removed
    }

    /// Issue a topology query toward the node at `path`. The callback fires
    /// when the matching response arrives; unmatched responses are ignored.
    pub fn query(&mut self, path: &str, callback: QueryCallback) -> u64 {
        // node address: the path terminates in "." at the queried peer
        let path = normalize_path(path);
        let target = if path == "." || path.ends_with("/.") {
            path
        } else {
            format!("{path}/.")
        };
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_queries.insert(request_id, callback);
        self.route(Envelope::query(&target, request_id));
        request_id
    }

    /// Identity, links and registered topics of this node.
    pub fn info(&self) -> TopologyInfo {
        let mut children: Vec<String> = self.children.keys().cloned().collect();
        children.sort();
        let mut topics: Vec<TopicInfo> = self
            .topics
            .values()
            .map(|t| TopicInfo {
                topic_id: t.id.clone(),
                content_type: t.content_type.clone(),
            })
            .collect();
        topics.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
        TopologyInfo {
            self_id: self.self_id.clone(),
            name: self.name.clone(),
            node_type: self.node_type.clone(),
            version: self.version.clone(),
            parent_id: self.parent_self_id.clone(),
            children,
            topics,
            origin: ".".to_string(),
        }
    }

    pub fn topic_content_type(&self, id: &str) -> Option<String> {
        self.topics.get(id).map(|t| t.content_type.clone())
    }

    pub fn topic_subscribers(&self, id: &str) -> Option<Vec<String>> {
        self.topics.get(id).map(|t| t.subscribers.clone())
    }

    // ---- routing --------------------------------------------------------

    /// Route a message by consuming the first hop of each target. Locally
    /// generated follow-ups (bounces, persisted replays, query responses) go
    /// through the same queue, so one call drains everything it caused.
    pub fn route(&mut self, env: Envelope) {
        let mut queue = VecDeque::from([env]);
        while let Some(env) = queue.pop_front() {
            self.route_step(env, &mut queue);
        }
    }

    fn route_step(&mut self, env: Envelope, queue: &mut VecDeque<Envelope>) {
        // Partition targets by first hop so each peer gets one copy carrying
        // all of its remainders.
        let mut hops: Vec<(String, Vec<String>)> = Vec::new();
        for target in &env.targets {
            let (hop, rest) = split_first_hop(target);
            match hops.iter_mut().find(|(h, _)| *h == hop) {
                Some((_, rests)) => rests.push(rest),
                None => hops.push((hop, vec![rest])),
            }
        }
        if hops.is_empty() {
            warn!("{} message with no targets dropped", env.msg.as_str());
            return;
        }
        for (hop, remainders) in hops {
            let mut msg = env.clone();
            msg.targets = remainders;
            if hop == "." {
                self.process(msg, queue);
            } else {
                self.forward(&hop, msg, queue);
            }
        }
    }

    fn forward(&mut self, hop: &str, mut msg: Envelope, queue: &mut VecDeque<Envelope>) {
        let conn_id = if hop == ".." {
            self.parent
        } else {
            self.children.get(hop).copied()
        };
        match conn_id {
            Some(conn_id) => {
                // Grow the return path: up through the parent we are known by
                // our selfId, down through a child we are its "..".
                msg.origin = if hop == ".." {
                    format!("{}/{}", self.self_id, msg.origin)
                } else {
                    format!("../{}", msg.origin)
                };
                self.transmit(conn_id, &msg);
            }
            None => {
                if msg.msg == MsgKind::NoRoute {
                    warn!("dropping unrouteable no_route bounce toward '{}'", hop);
                    return;
                }
                debug!("no route for hop '{}', bouncing {}", hop, msg.msg.as_str());
                queue.push_back(Envelope::no_route(&msg, hop));
            }
        }
    }

    fn transmit(&self, conn_id: ConnectionId, msg: &Envelope) {
        let Some(conn) = self.connections.get(&conn_id) else {
            return;
        };
        match msg.to_frame() {
            Ok(frame) => conn.send(frame),
            Err(e) => warn!("failed to serialize {} message: {}", msg.msg.as_str(), e),
        }
    }

    fn process(&mut self, msg: Envelope, queue: &mut VecDeque<Envelope>) {
        match msg.msg {
            MsgKind::Subscribe => self.on_subscribe(msg, queue),
            MsgKind::SubscribeFailed => self.on_subscribe_failed(msg),
            MsgKind::Publish => self.on_publish(msg),
            MsgKind::PublishAt => self.on_publish_at(msg, queue),
            MsgKind::Unsubscribe => self.on_unsubscribe(msg),
            MsgKind::NoRoute => self.on_no_route(msg),
            MsgKind::Query => self.on_query(msg, queue),
            MsgKind::QueryResponse => self.on_query_response(msg),
        }
    }

    /// Terminal `subscribe`: each remaining target is a topic id here.
    fn on_subscribe(&mut self, msg: Envelope, queue: &mut VecDeque<Envelope>) {
        for target in msg.targets.clone() {
            let Some(topic) = self.topics.get_mut(&target) else {
                warn!("subscribe to unknown topic '{}' from '{}'", target, msg.origin);
                queue.push_back(Envelope::subscribe_failed(&msg, &target));
                continue;
            };
            let added = topic.add_subscriber(&msg.origin);
            let changed = topic.on_subscriber_changed.clone();
            let replay = topic
                .persisted
                .clone()
                .map(|data| (data, topic.persisted_binary, topic.content_type.clone()));
            if added {
                debug!("'{}' subscribed to '{}'", msg.origin, target);
                if let Some(cb) = changed {
                    self.dispatches.push(Dispatch::SubscriberChanged(
                        cb,
                        target.clone(),
                        msg.origin.clone(),
                        true,
                    ));
                }
            }
            if let Some((data, binary, content_type)) = replay {
                queue.push_back(Envelope::publish(
                    &target,
                    &content_type,
                    &data,
                    true,
                    binary,
                    vec![msg.origin.clone()],
                    None,
                ));
            }
        }
    }

    fn on_subscribe_failed(&mut self, msg: Envelope) {
        let leaf = msg
            .orig_msg
            .as_ref()
            .and_then(|m| m.targets.first())
            .cloned()
            .unwrap_or_default();
        let path = subscription_key(&msg.origin, &leaf);
        warn!("subscribe to '{}' failed at owner", path);
        self.fail_subscriptions(&path, "subscribe");
    }

    /// Terminal `publish`: deliver to local callbacks. The subscription key
    /// is recovered from the return path plus the topic id.
    fn on_publish(&mut self, msg: Envelope) {
        let topic_id = msg.topic.clone().unwrap_or_default();
        let key = subscription_key(&msg.origin, &topic_id);
        let Some(subs) = self.subscriptions.get(&key) else {
            debug!("publish for '{}' with no local subscribers", key);
            return;
        };
        let payload = Payload::from_envelope(&msg);
        let deliveries: Vec<Dispatch> = subs
            .iter()
            .map(|s| Dispatch::Deliver(s.callback.clone(), Ok(payload.clone())))
            .collect();
        self.dispatches.extend(deliveries);
    }

    /// Terminal `publish_at`: republish into the locally owned topic on
    /// behalf of a remote (or bridge) origin.
    fn on_publish_at(&mut self, msg: Envelope, queue: &mut VecDeque<Envelope>) {
        for target in msg.targets.clone() {
            let Some(topic) = self.topics.get_mut(&target) else {
                warn!(
                    "publish_at for unknown topic '{}' from '{}'",
                    target, msg.origin
                );
                continue;
            };
            let data = msg.payload_bytes();
            let binary = msg.binary.unwrap_or(false);
            let persisted = msg.persisted.unwrap_or(false);
            if persisted {
                topic.persisted = Some(data.clone());
                topic.persisted_binary = binary;
            }
            let targets = topic.subscribers.clone();
            let content_type = topic.content_type.clone();
            if targets.is_empty() {
                continue;
            }
            queue.push_back(Envelope::publish(
                &target,
                &content_type,
                &data,
                persisted,
                binary,
                targets,
                Some(msg.origin.clone()),
            ));
        }
    }

    fn on_unsubscribe(&mut self, msg: Envelope) {
        for target in msg.targets.clone() {
            let Some(topic) = self.topics.get_mut(&target) else {
                continue;
            };
            if topic.remove_subscriber(&msg.origin) {
                debug!("'{}' unsubscribed from '{}'", msg.origin, target);
                let changed = topic.on_subscriber_changed.clone();
                if let Some(cb) = changed {
                    self.dispatches.push(Dispatch::SubscriberChanged(
                        cb,
                        target.clone(),
                        msg.origin.clone(),
                        false,
                    ));
                }
            }
        }
    }

    /// A message we sent could not be routed somewhere downstream. The bounce
    /// origin is the unreachable peer's path from here.
    fn on_no_route(&mut self, msg: Envelope) {
        let failed = msg.failed_msg.clone().unwrap_or_default();
        warn!("no route to '{}' for {} message", msg.origin, failed);
        match failed.as_str() {
            // An unreachable publish target is a dead subscriber: drop every
            // address behind the unreachable hop from the topic.
            "publish" => {
                if let Some(topic_id) = msg.orig_msg.as_ref().and_then(|m| m.topic.clone()) {
                    self.prune_unreachable(&topic_id, &msg.origin);
                }
            }
            "subscribe" => {
                let leaf = msg
                    .orig_msg
                    .as_ref()
                    .and_then(|m| m.targets.first())
                    .cloned()
                    .unwrap_or_default();
                let path = subscription_key(&msg.origin, &leaf);
                self.fail_subscriptions(&path, "subscribe");
            }
            "query" => {
                if let Some(request_id) = msg
                    .orig_msg
                    .as_ref()
                    .and_then(|m| m.request.as_deref())
                    .and_then(|r| r.parse::<u64>().ok())
                {
                    if self.pending_queries.remove(&request_id).is_some() {
                        warn!("query {} abandoned: no route", request_id);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_query(&mut self, msg: Envelope, queue: &mut VecDeque<Envelope>) {
        let request = msg.request.clone().unwrap_or_default();
        queue.push_back(self.info().into_envelope(&msg.origin, &request));
    }

    fn on_query_response(&mut self, msg: Envelope) {
        let Some(request_id) = msg.request.as_deref().and_then(|r| r.parse::<u64>().ok()) else {
            warn!("query response without a parseable request id");
            return;
        };
        match self.pending_queries.remove(&request_id) {
            Some(callback) => {
                let answer = TopologyInfo::from_envelope(&msg);
                self.dispatches.push(Dispatch::QueryAnswer(callback, answer));
            }
            None => debug!("ignoring unmatched query response {}", request_id),
        }
    }

    fn fail_subscriptions(&mut self, path: &str, failed_msg: &str) {
        let Some(subs) = self.subscriptions.remove(path) else {
            return;
        };
        let failure = RouteFailure {
            path: path.to_string(),
            failed_msg: failed_msg.to_string(),
        };
        for sub in subs {
            self.dispatches
                .push(Dispatch::Deliver(sub.callback, Err(failure.clone())));
        }
    }

    fn prune_unreachable(&mut self, topic_id: &str, origin: &str) {
        let prefix = format!("{origin}/");
        let Some(topic) = self.topics.get_mut(topic_id) else {
            return;
        };
        let gone: Vec<String> = topic
            .subscribers
            .iter()
            .filter(|s| *s == origin || s.starts_with(&prefix))
            .cloned()
            .collect();
        if gone.is_empty() {
            return;
        }
        topic
            .subscribers
            .retain(|s| s != origin && !s.starts_with(&prefix));
        let changed = topic.on_subscriber_changed.clone();
        for address in gone {
            info!("removing unreachable subscriber '{}' from '{}'", address, topic_id);
            if let Some(cb) = &changed {
                self.dispatches.push(Dispatch::SubscriberChanged(
                    cb.clone(),
                    topic_id.to_string(),
                    address,
                    false,
                ));
            }
        }
    }

    // ---- connections ----------------------------------------------------

    /// Register a new peer link in the Connecting state. The returned id is
    /// the only handle the transport task keeps.
    pub fn add_connection(
        &mut self,
        sender: UnboundedSender<Frame>,
        is_parent: bool,
    ) -> ConnectionId {
        let id = self.next_connection_id;
        self.next_connection_id += 1;
        self.connections.insert(id, Connection::new(id, sender, is_parent));
        id
    }

    /// Run the authentication state machine for a connection, from inbound
    /// headers or a received `authenticate` control frame.
    ///
    /// On success: any prior connection for the same selfId is torn down, the
    /// peer is entered into the lookup tables, a `connected` event goes out
    /// on the management topic, our own identity is echoed back (inbound
    /// side), and frames buffered while unauthenticated are replayed in
    /// arrival order.
    pub fn authenticate(
        &mut self,
        conn_id: ConnectionId,
        self_id: &str,
        token: &str,
    ) -> Result<(), RouterError> {
        let Some(conn) = self.connections.get(&conn_id) else {
            return Err(RouterError::ConnectionRefused(format!(
                "unknown connection {conn_id}"
            )));
        };
        if conn.authenticated && conn.self_id.as_deref() == Some(self_id) {
            // duplicate control frame, nothing to do
            return Ok(());
        }

        // Our own token always authenticates. A configured validator decides
        // for any other token; with no validator the peer is trusted.
        let accepted = match &self.validator {
            Some(validator) => token == self.token || validator(self_id, token),
            None => true,
        };
        if !accepted {
            warn!("authentication rejected for '{}'", self_id);
            conn.send(Frame::Close(Some("authentication failed".to_string())));
            self.connections.remove(&conn_id);
            return Err(RouterError::AuthRejected(self_id.to_string()));
        }

        // Single connection per identity: evict any prior holder.
        if let Some(old) = self
            .children
            .get(self_id)
            .copied()
            .filter(|old| *old != conn_id)
        {
            info!("evicting stale connection for '{}'", self_id);
            if let Some(old_conn) = self.connections.get(&old) {
                old_conn.send(Frame::Close(Some("superseded".to_string())));
            }
            self.remove_connection(old);
        }
        if self.parent_self_id.as_deref() == Some(self_id) && self.parent != Some(conn_id) {
            if let Some(old) = self.parent {
                info!("replacing parent connection for '{}'", self_id);
                if let Some(old_conn) = self.connections.get(&old) {
                    old_conn.send(Frame::Close(Some("superseded".to_string())));
                }
                self.remove_connection(old);
            }
        }

        let Some(conn) = self.connections.get_mut(&conn_id) else {
            return Err(RouterError::ConnectionRefused(format!(
                "connection {conn_id} vanished during authentication"
            )));
        };
        conn.authenticated = true;
        conn.self_id = Some(self_id.to_string());
        let is_parent = conn.is_parent;
        let pending = std::mem::take(&mut conn.pending);

        if is_parent {
            self.parent = Some(conn_id);
            self.parent_self_id = Some(self_id.to_string());
        } else {
            self.children.insert(self_id.to_string(), conn_id);
            // Introduce ourselves so the peer can authenticate this link from
            // its side; headers only flow client to server.
            let control = ControlFrame::authenticate(&self.self_id, &self.token);
            if let (Some(conn), Ok(text)) =
                (self.connections.get(&conn_id), serde_json::to_string(&control))
            {
                conn.send(Frame::Text(text));
            }
        }
        info!("'{}' connected (parent: {})", self_id, is_parent);
        self.publish_event("connected", self_id, is_parent);

        for frame in pending {
            self.handle_data_frame(conn_id, frame);
        }
        Ok(())
    }

    /// Entry point for every frame received from a peer socket.
    pub fn handle_frame(&mut self, conn_id: ConnectionId, frame: Frame) {
        match frame {
            Frame::Ping(data) => {
                if let Some(conn) = self.connections.get(&conn_id) {
                    conn.send(Frame::Pong(data));
                }
            }
            Frame::Pong(data) => {
                if let Some(sent) = std::str::from_utf8(&data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                {
                    let rtt = chrono::Utc::now().timestamp_millis() - sent;
                    debug!("pong from connection {} after {}ms", conn_id, rtt);
                }
            }
            Frame::Close(reason) => {
                info!(
                    "connection {} closed by peer{}",
                    conn_id,
                    reason.map(|r| format!(": {r}")).unwrap_or_default()
                );
                self.remove_connection(conn_id);
            }
            Frame::Text(_) | Frame::Binary(_) => self.handle_data_frame(conn_id, frame),
        }
    }

    fn handle_data_frame(&mut self, conn_id: ConnectionId, frame: Frame) {
        // Authentication control frames are out of band from routed messages
        // and accepted at any time.
        if let Frame::Text(text) = &frame {
            if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
                if control.control == "authenticate" {
                    let _ = self.authenticate(conn_id, &control.self_id, &control.token);
                } else {
                    warn!("unknown control frame '{}' dropped", control.control);
                }
                return;
            }
        }

        let authenticated = self
            .connections
            .get(&conn_id)
            .map(|c| c.authenticated)
            .unwrap_or(false);
        if !authenticated {
            if let Some(conn) = self.connections.get_mut(&conn_id) {
                debug!("buffering frame on unauthenticated connection {}", conn_id);
                conn.pending.push(frame);
            }
            return;
        }

        let env = match frame {
            Frame::Text(text) => match serde_json::from_str::<Envelope>(&text) {
                Ok(env) => env,
                Err(e) => {
                    warn!("dropping malformed frame from connection {}: {}", conn_id, e);
                    return;
                }
            },
            Frame::Binary(bytes) => match Envelope::from_binary_frame(&bytes) {
                Ok(env) => env,
                Err(e) => {
                    warn!(
                        "dropping malformed binary frame from connection {}: {}",
                        conn_id, e
                    );
                    return;
                }
            },
            _ => return,
        };
        self.route(env);
    }

    /// Tear down a connection: clear the lookup tables, drop every subscriber
    /// address routed through the dead peer, and announce the loss.
    pub fn remove_connection(&mut self, conn_id: ConnectionId) {
        let Some(conn) = self.connections.remove(&conn_id) else {
            return;
        };
        if !conn.authenticated {
            return;
        }
        let self_id = conn.self_id.clone().unwrap_or_default();
        if conn.is_parent {
            if self.parent == Some(conn_id) {
                self.parent = None;
                self.parent_self_id = None;
            }
        } else if self.children.get(&self_id) == Some(&conn_id) {
            self.children.remove(&self_id);
        }

        let prefix = format!("{self_id}/");
        let mut removed: Vec<(Option<SubscriberChangedCallback>, String, String)> = Vec::new();
        for (topic_id, topic) in self.topics.iter_mut() {
            let gone: Vec<String> = topic
                .subscribers
                .iter()
                .filter(|s| s.starts_with(&prefix))
                .cloned()
                .collect();
            if gone.is_empty() {
                continue;
            }
            topic.subscribers.retain(|s| !s.starts_with(&prefix));
            for address in gone {
                removed.push((topic.on_subscriber_changed.clone(), topic_id.clone(), address));
            }
        }
        for (changed, topic_id, address) in removed {
            debug!("dropping subscriber '{}' from '{}'", address, topic_id);
            if let Some(cb) = changed {
                self.dispatches
                    .push(Dispatch::SubscriberChanged(cb, topic_id, address, false));
            }
        }

        info!("'{}' disconnected (parent: {})", self_id, conn.is_parent);
        self.publish_event("disconnected", &self_id, conn.is_parent);
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    fn publish_event(&mut self, event: &str, self_id: &str, is_parent: bool) {
        let body = serde_json::json!({
            "event": event,
            "selfId": self_id,
            "parent": is_parent,
        });
        self.publish(MANAGEMENT_TOPIC, body.to_string().as_bytes(), false, false);
    }
}

/// Split a target into its first hop and the remainder. A target without a
/// separator is terminal: it is consumed at this node.
pub fn split_first_hop(target: &str) -> (String, String) {
    match target.split_once('/') {
        Some((hop, rest)) => (hop.to_string(), rest.to_string()),
        None => (".".to_string(), target.to_string()),
    }
}

/// Recover the local subscription key from a message's return path and the
/// topic id: the terminal `.` of the origin stands in for the topic.
pub fn subscription_key(origin: &str, topic: &str) -> String {
    if origin == "." || origin.is_empty() {
        topic.to_string()
    } else if let Some(stripped) = origin.strip_suffix("/.") {
        format!("{stripped}/{topic}")
    } else {
        format!("{origin}/{topic}")
    }
}

/// Strip redundant `./` prefixes and any trailing separator; a bare local
/// topic id, `"./topic"` and `"topic/"` all name the same subscription.
pub fn normalize_path(path: &str) -> String {
    let mut path = path;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.trim_end_matches('/').to_string()
}
