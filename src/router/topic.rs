//! Topic registry entries.
//!
//! A `Topic` pairs a content type with the ordered list of subscriber
//! addresses. Addresses are route paths (e.g. `"cam-node/."`), not callback
//! handles: remote subscribers are represented purely by where a publish must
//! be routed. Local subscribers appear as the address `"."`.

use std::sync::Arc;

/// Invoked whenever a subscriber address is added to or removed from a topic:
/// `(topic_id, address, added)`.
pub type SubscriberChangedCallback = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

pub struct Topic {
    pub id: String,
    pub content_type: String,
    /// Ordered, de-duplicated subscriber addresses.
    pub subscribers: Vec<String>,
    /// Last payload published with the persisted flag, replayed to new
    /// subscribers. In-memory only.
    pub persisted: Option<Vec<u8>>,
    pub persisted_binary: bool,
    pub on_subscriber_changed: Option<SubscriberChangedCallback>,
}

impl Topic {
    pub fn new(id: &str, content_type: &str) -> Self {
        Self {
            id: id.to_string(),
            content_type: content_type.to_string(),
            subscribers: Vec::new(),
            persisted: None,
            persisted_binary: false,
            on_subscriber_changed: None,
        }
    }

    /// Add a subscriber address; duplicates are ignored. Returns whether the
    /// list changed.
    pub fn add_subscriber(&mut self, address: &str) -> bool {
        if self.subscribers.iter().any(|s| s == address) {
            return false;
        }
        self.subscribers.push(address.to_string());
        true
    }

    /// Remove a subscriber address. Returns whether the list changed.
    pub fn remove_subscriber(&mut self, address: &str) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s != address);
        self.subscribers.len() != before
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id)
            .field("content_type", &self.content_type)
            .field("subscribers", &self.subscribers)
            .field("persisted", &self.persisted.as_ref().map(|p| p.len()))
            .finish()
    }
}
