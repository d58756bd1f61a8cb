#![allow(dead_code)]
mod config;
mod connection;
mod router;
mod transport;
mod utils;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::load_config;
use crate::router::Node;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    utils::logging::init("info");

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let node = Node::new(&settings);
    let server = tokio::spawn(transport::serve(
        node.clone(),
        settings.clone(),
        listener,
    ));
    let uplink = tokio::spawn(transport::maintain_parent_link(
        node.clone(),
        settings.clone(),
    ));

    tokio::select! {
        result = server => {
            if let Ok(Err(e)) = result {
                error!("server exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    uplink.abort();
}
