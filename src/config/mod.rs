mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    NetworkSettings, NodeSettings, RestSettings, ServerSettings, Settings,
};

use settings::PartialSettings;

/// Loads configuration from `config/default.toml` (optional) and the
/// environment (`NODE__SELF_ID`, `SERVER__PORT`, ...), merged over defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__"));

    let config = builder.build()?;

    // Deserialize what is available, then fill the gaps from defaults.
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        node: NodeSettings {
            self_id: partial
                .node
                .as_ref()
                .and_then(|n| n.self_id.clone())
                .unwrap_or(default.node.self_id),
            name: partial
                .node
                .as_ref()
                .and_then(|n| n.name.clone())
                .unwrap_or(default.node.name),
            node_type: partial
                .node
                .as_ref()
                .and_then(|n| n.node_type.clone())
                .unwrap_or(default.node.node_type),
            token: partial
                .node
                .as_ref()
                .and_then(|n| n.token.clone())
                .unwrap_or(default.node.token),
        },
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            web_root: partial.server.as_ref().and_then(|s| s.web_root.clone()),
        },
        network: NetworkSettings {
            parent_url: partial.network.as_ref().and_then(|n| n.parent_url.clone()),
            keepalive_secs: partial
                .network
                .as_ref()
                .and_then(|n| n.keepalive_secs)
                .unwrap_or(default.network.keepalive_secs),
            reconnect_secs: partial
                .network
                .as_ref()
                .and_then(|n| n.reconnect_secs)
                .unwrap_or(default.network.reconnect_secs),
        },
        rest: partial.rest.unwrap_or_default(),
    })
}
