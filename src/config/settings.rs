use serde::Deserialize;

/// Top-level configuration for one router node.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub node: NodeSettings,
    pub server: ServerSettings,
    pub network: NetworkSettings,
    pub rest: RestSettings,
}

/// Identity of this node in the overlay.
#[derive(Debug, Deserialize, Clone)]
pub struct NodeSettings {
    /// Logical identity presented to the parent and used by children to
    /// address this node.
    pub self_id: String,
    /// Human-readable display name, reported in topology queries.
    pub name: String,
    /// Node type string reported in topology queries (e.g. "router", "robot").
    pub node_type: String,
    /// Bearer token presented to the parent and expected from children.
    pub token: String,
}

/// Listener configuration for the streaming/HTTP endpoints.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory served as static content, if any.
    pub web_root: Option<String>,
}

/// Overlay link configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkSettings {
    /// WebSocket URL of the parent node, e.g. `ws://10.0.0.1:8080/stream`.
    /// When unset this node is a root.
    pub parent_url: Option<String>,
    /// Keep-alive ping interval in seconds.
    pub keepalive_secs: u64,
    /// Fixed delay before re-dialing the parent after a lost link.
    pub reconnect_secs: u64,
}

/// Optional HTTP Basic credentials gating the REST bridge.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RestSettings {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Partial settings loaded from files or environment; missing values fall
/// back to `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub node: Option<PartialNodeSettings>,
    pub server: Option<PartialServerSettings>,
    pub network: Option<PartialNetworkSettings>,
    pub rest: Option<RestSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialNodeSettings {
    pub self_id: Option<String>,
    pub name: Option<String>,
    pub node_type: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub web_root: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialNetworkSettings {
    pub parent_url: Option<String>,
    pub keepalive_secs: Option<u64>,
    pub reconnect_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node: NodeSettings {
                self_id: "self".to_string(),
                name: "treebus".to_string(),
                node_type: "router".to_string(),
                token: String::new(),
            },
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                web_root: None,
            },
            network: NetworkSettings {
                parent_url: None,
                keepalive_secs: 30,
                reconnect_secs: 5,
            },
            rest: RestSettings::default(),
        }
    }
}
