//! Network transports: the inbound HTTP/WebSocket server, the REST topic
//! bridge, and the outbound parent uplink.

pub mod bridge;
pub mod parent;
pub mod server;

pub use parent::maintain_parent_link;
pub use server::{app, serve};
