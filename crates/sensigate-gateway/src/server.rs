//! Gateway server: peer route, health probe, outbound peer dialing

use crate::auth::PeerAuth;
use crate::ws::{accept_peer, connect_peer};
use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sensigate_access::RemoteRelay;
use sensigate_core::{GatewayConfig, Result};
use sensigate_message::NotificationEngine;
use sensigate_model::ResourceModel;
use sensigate_remote::BridgeOptions;
use sensigate_session::Core;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const TOKEN_ENV: &str = "SENSIGATE_PEER_TOKEN";

pub struct GatewayState {
    pub core: Arc<Core>,
    pub auth: PeerAuth,
    pub options: BridgeOptions,
    pub started_at: std::time::Instant,
}

impl GatewayState {
    pub fn new(core: Arc<Core>, auth: PeerAuth, options: BridgeOptions) -> Arc<Self> {
        Arc::new(Self {
            core,
            auth,
            options,
            started_at: std::time::Instant::now(),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Arc<Self>> {
        let core = build_core(config)?;
        let auth = PeerAuth::from_config(&config.peer, std::env::var(TOKEN_ENV).ok());
        Ok(Self::new(core, auth, BridgeOptions::from_config(&config.peer)))
    }
}

/// Engine, model and core for one gateway instance.
pub fn build_core(config: &GatewayConfig) -> Result<Arc<Core>> {
    let engine = Arc::new(NotificationEngine::new(Some(config.namespace.clone())));
    let model = Arc::new(ResourceModel::new(engine.clone()));
    Ok(Arc::new(Core::from_config(config, model, engine)?))
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/peer", get(peer_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app).await?;
    Ok(())
}

/// Dial every configured peer in the background. Failures are logged.
pub fn dial_peers(state: &Arc<GatewayState>, peers: &[String]) {
    for url in peers {
        let state = state.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let token = state.auth.token.clone();
            match connect_peer(&url, token.as_deref(), state.core.clone(), state.options.clone()).await {
                Ok(bridge) => info!("Federated with {} at {}", bridge.namespace(), url),
                Err(e) => warn!("Could not federate with {}: {}", url, e),
            }
        });
    }
}

pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let state = GatewayState::from_config(&config)?;
    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr).await?;

    info!("Sensigate v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Namespace: {}", config.namespace);
    info!("  Listening on: {}", bind_addr);
    info!("  Peer link: ws://{}/peer", bind_addr);
    info!("  Peer token: {}", if state.auth.token.is_some() { "required" } else { "none" });

    dial_peers(&state, &config.peer.peers);
    serve(listener, state).await
}

async fn peer_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Err(e) = state.auth.verify_token(PeerAuth::bearer(header)) {
        warn!("Rejected peer from {}: {}", addr, e);
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }
    let core = state.core.clone();
    let options = state.options.clone();
    ws.on_upgrade(move |socket| accept_peer(socket, core, options, addr.to_string()))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let peers: Vec<_> = state
        .core
        .dispatcher()
        .remotes()
        .iter()
        .map(|relay| {
            serde_json::json!({
                "namespace": relay.namespace(),
                "connected": relay.is_connected(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "namespace": state.core.namespace().as_str(),
        "sessions": state.core.sessions().len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "peers": peers,
    }))
}
