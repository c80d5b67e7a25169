//! Bridge server: HTTP/WebSocket front plus the bus relay.

use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::router::create_app_router;
use super::Bridge;
use crate::bus::{wait_for_shutdown, Subscription};
use crate::error::{Error, Result};

/// Largest accepted submission.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Web server configuration.
pub struct BridgeServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for BridgeServerConfig {
    fn default() -> Self {
        Self {
            port: 8081,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Serve viewers and relay the bus until shutdown.
///
/// The relay subscribes before the listener is bound, so nothing published
/// after this call's subscription is missed by viewers.
pub async fn run_bridge(
    bridge: Bridge,
    config: BridgeServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let Some(subscription) = bridge.subscribe(&mut shutdown).await? else {
        return Ok(());
    };
    run_bridge_subscribed(bridge, subscription, config, shutdown).await
}

/// Like [`run_bridge`], with the relay subscription already open.
pub async fn run_bridge_subscribed(
    bridge: Bridge,
    subscription: Subscription,
    config: BridgeServerConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = create_app_router(bridge.clone())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(component = "bridge", bus = bridge.bus_name(), "Bridge listening on http://{}", addr);

    let mut server_shutdown = shutdown.clone();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut server_shutdown).await })
            .await
            .map_err(Error::Io)
    };
    let relay = async move {
        bridge
            .run_relay_subscribed(subscription, shutdown)
            .await
            .map_err(Error::Transport)
    };

    tokio::try_join!(server, relay)?;
    Ok(())
}
