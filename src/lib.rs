//! # Treebus
//!
//! `treebus` is a hierarchical publish/subscribe message router. Nodes link
//! into a tree over WebSockets and address each other with filesystem-style
//! relative paths, so no node needs to know the topology beyond its own
//! parent and children.
//!
//! ## Core Modules
//!
//! - `router`: the routing engine (topic registry, path-based forwarding,
//!   local subscriptions, connection lifecycle and topology queries).
//! - `connection`: peer link state and transport-neutral frames.
//! - `transport`: the inbound HTTP/WebSocket server, the REST topic bridge
//!   and the outbound parent uplink.
//! - `config`: layered configuration from file and environment.
//! - `utils`: shared error type and logging setup.

pub mod config;
pub mod connection;
pub mod router;
pub mod transport;
pub mod utils;
