//! The topic router: registry, addressing and forwarding, local
//! subscriptions, connection lifecycle and topology queries.

pub mod engine;
pub mod message;
pub mod node;
pub mod topic;

pub use engine::{
    MANAGEMENT_TOPIC, QueryCallback, Router, SubscriberCallback, SubscriptionId, TokenValidator,
};
pub use message::{Envelope, MsgKind, Payload, RouteFailure, TopicInfo, TopologyInfo};
pub use node::Node;
pub use topic::{SubscriberChangedCallback, Topic};

#[cfg(test)]
mod tests;
