//! Peer links over WebSocket
//!
//! One JSON-encoded [`PeerMessage`] per text frame. The accepting side is an
//! axum route (`/peer`); the dialing side uses tokio-tungstenite. Both wrap
//! their split socket in the same [`WsEndpoint`].

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use sensigate_core::{Error, PeerMessage, Result};
use sensigate_access::RemoteRelay;
use sensigate_remote::{BridgeOptions, RemoteBridge, RemoteEndpoint};
use sensigate_session::Core;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientMessage};
use tracing::{debug, info, warn};

pub enum Frame {
    Text(String),
    Close,
    Skip,
}

/// The bits of a WebSocket message type a peer link needs.
pub trait WsFrame: Send + 'static {
    fn text(text: String) -> Self;
    fn into_frame(self) -> Frame;
}

impl WsFrame for WsMessage {
    fn text(text: String) -> Self {
        WsMessage::Text(text)
    }

    fn into_frame(self) -> Frame {
        match self {
            WsMessage::Text(text) => Frame::Text(text),
            WsMessage::Close(_) => Frame::Close,
            _ => Frame::Skip,
        }
    }
}

impl WsFrame for ClientMessage {
    fn text(text: String) -> Self {
        ClientMessage::Text(text)
    }

    fn into_frame(self) -> Frame {
        match self {
            ClientMessage::Text(text) => Frame::Text(text),
            ClientMessage::Close(_) => Frame::Close,
            _ => Frame::Skip,
        }
    }
}

pub struct WsEndpoint<M, Tx, Rx> {
    name: String,
    tx: Mutex<Tx>,
    rx: Mutex<Rx>,
    _frame: PhantomData<fn() -> M>,
}

impl<M, Tx, Rx> WsEndpoint<M, Tx, Rx> {
    pub fn new(name: impl Into<String>, tx: Tx, rx: Rx) -> Self {
        Self {
            name: name.into(),
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            _frame: PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<M, Tx, Rx, E> RemoteEndpoint for WsEndpoint<M, Tx, Rx>
where
    M: WsFrame,
    Tx: Sink<M> + Unpin + Send,
    Tx::Error: Display,
    Rx: Stream<Item = std::result::Result<M, E>> + Unpin + Send,
    E: Display + Send,
{
    async fn send(&self, message: PeerMessage) -> Result<()> {
        let frame = M::text(message.to_json()?);
        self.tx
            .lock()
            .await
            .send(frame)
            .await
            .map_err(|e| Error::unavailable(format!("send to {} failed: {}", self.name, e)))
    }

    async fn recv(&self) -> Option<Result<PeerMessage>> {
        let mut rx = self.rx.lock().await;
        loop {
            let frame = match rx.next().await? {
                Ok(message) => message.into_frame(),
                Err(e) => {
                    warn!("WebSocket error on {}: {}", self.name, e);
                    return None;
                }
            };
            match frame {
                Frame::Text(text) => return Some(PeerMessage::from_json(&text)),
                Frame::Close => {
                    debug!("{} closed the socket", self.name);
                    return None;
                }
                Frame::Skip => continue,
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.tx.lock().await.close().await {
            debug!("closing {}: {}", self.name, e);
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Serve a peer that dialed our `/peer` route.
pub async fn accept_peer(socket: WebSocket, core: Arc<Core>, options: BridgeOptions, remote: String) {
    let (tx, rx) = socket.split();
    let endpoint = Arc::new(WsEndpoint::<WsMessage, _, _>::new(format!("ws:{}", remote), tx, rx));
    match RemoteBridge::connect(core, endpoint, options).await {
        Ok(bridge) => {
            info!("Accepted peer {} from {}", bridge.namespace(), remote);
            bridge.closed().await;
        }
        Err(e) => warn!("Peer from {} rejected: {}", remote, e),
    }
}

/// Dial a peer gateway (`ws://host:port/peer`) and bring the link up.
pub async fn connect_peer(
    url: &str,
    token: Option<&str>,
    core: Arc<Core>,
    options: BridgeOptions,
) -> Result<Arc<RemoteBridge>> {
    let mut request = url
        .into_client_request()
        .map_err(|e| Error::Config(format!("invalid peer url {}: {}", url, e)))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| Error::Config(format!("invalid peer token: {}", e)))?;
        request.headers_mut().insert("authorization", value);
    }
    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| Error::unavailable(format!("failed to connect to peer at {}: {}", url, e)))?;
    let (tx, rx) = stream.split();
    let endpoint = Arc::new(WsEndpoint::<ClientMessage, _, _>::new(format!("ws:{}", url), tx, rx));
    RemoteBridge::connect(core, endpoint, options).await
}
