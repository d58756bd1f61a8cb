//! The public handle to one router instance.
//!
//! `Node` is what collaborators receive by injection: a cheap clone wrapping
//! the engine behind a mutex. The mutex is the node's single logical
//! processing context: socket tasks, timers and HTTP handlers all funnel
//! through it, so engine state is never concurrently mutated. Local callback
//! invocations produced while the lock was held are run by `Node` after
//! release, so a callback may safely call back into the router.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use crate::config::Settings;
use crate::connection::{ConnectionId, Frame};
use crate::router::engine::{
    QueryCallback, Router, SubscriberCallback, SubscriptionId, TokenValidator,
};
use crate::router::message::TopologyInfo;
use crate::router::topic::SubscriberChangedCallback;
use crate::utils::error::RouterError;

#[derive(Clone)]
pub struct Node {
    router: Arc<Mutex<Router>>,
}

impl Node {
    pub fn new(settings: &Settings) -> Self {
        Self {
            router: Arc::new(Mutex::new(Router::new(settings))),
        }
    }

    pub fn with_validator(settings: &Settings, validator: TokenValidator) -> Self {
        let node = Self::new(settings);
        node.locked(|r| r.set_validator(validator));
        node
    }

    /// Run a closure under the router lock, then fire any callback
    /// invocations it produced.
    fn locked<T>(&self, f: impl FnOnce(&mut Router) -> T) -> T {
        let (out, dispatches) = {
            let mut router = self.router.lock().unwrap();
            let out = f(&mut router);
            (out, router.take_dispatches())
        };
        for dispatch in dispatches {
            dispatch.run();
        }
        out
    }

    // ---- registry / pub-sub API ----------------------------------------

    pub fn register_topic(
        &self,
        id: &str,
        content_type: &str,
        on_subscriber_changed: Option<SubscriberChangedCallback>,
    ) {
        self.locked(|r| r.register_topic(id, content_type, on_subscriber_changed));
    }

    pub fn unregister_topic(&self, id: &str) {
        self.locked(|r| r.unregister_topic(id));
    }

    pub fn publish(&self, id: &str, data: &[u8], persisted: bool, binary: bool) -> bool {
        self.locked(|r| r.publish(id, data, persisted, binary))
    }

    pub fn send(&self, target: &str, id: &str, data: &[u8], binary: bool) -> bool {
        self.locked(|r| r.send(target, id, data, binary))
    }

    pub fn publish_at(&self, path: &str, data: &[u8], persisted: bool, binary: bool) -> bool {
        self.locked(|r| r.publish_at(path, data, persisted, binary))
    }

    pub fn subscribe(
        &self,
        path: &str,
        callback: SubscriberCallback,
    ) -> Result<SubscriptionId, RouterError> {
        self.locked(|r| r.subscribe(path, callback))
    }

    pub fn unsubscribe(&self, path: &str, owner: Option<SubscriptionId>) -> bool {
        self.locked(|r| r.unsubscribe(path, owner))
    }

    pub fn query(&self, path: &str, callback: QueryCallback) -> u64 {
        self.locked(|r| r.query(path, callback))
    }

    pub fn info(&self) -> TopologyInfo {
        self.locked(|r| r.info())
    }

    pub fn topic_content_type(&self, id: &str) -> Option<String> {
        self.locked(|r| r.topic_content_type(id))
    }

    pub fn topic_subscribers(&self, id: &str) -> Option<Vec<String>> {
        self.locked(|r| r.topic_subscribers(id))
    }

    // ---- transport API --------------------------------------------------

    pub fn connection_opened(
        &self,
        sender: UnboundedSender<Frame>,
        is_parent: bool,
    ) -> ConnectionId {
        self.locked(|r| r.add_connection(sender, is_parent))
    }

    pub fn connection_closed(&self, conn_id: ConnectionId) {
        self.locked(|r| r.remove_connection(conn_id));
    }

    pub fn authenticate(
        &self,
        conn_id: ConnectionId,
        self_id: &str,
        token: &str,
    ) -> Result<(), RouterError> {
        self.locked(|r| r.authenticate(conn_id, self_id, token))
    }

    pub fn handle_frame(&self, conn_id: ConnectionId, frame: Frame) {
        self.locked(|r| r.handle_frame(conn_id, frame));
    }

    pub fn self_id(&self) -> String {
        self.locked(|r| r.self_id().to_string())
    }

    pub fn instance_id(&self) -> String {
        self.locked(|r| r.instance_id().to_string())
    }

    pub fn has_parent(&self) -> bool {
        self.locked(|r| r.has_parent())
    }
}
