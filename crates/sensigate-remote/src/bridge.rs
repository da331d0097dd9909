//! Remote Core Bridge
//!
//! One bridge per peer link. After the namespace handshake the bridge binds
//! itself as the relay for the peer's namespace and runs two tasks: a writer
//! draining the outbound queue into the endpoint and a reader serving
//! inbound frames. Calls the peer relays to us are served through a session
//! keyed by (peer namespace, caller public key); replies to our own calls
//! are correlated by id.
//!
//! The link is never re-established automatically. When it goes away every
//! pending call resolves to BackendUnavailable, every session the peer
//! opened here is closed, and the bridge stays bound in the DISCONNECTED
//! state so that calls into the namespace keep failing with
//! BackendUnavailable until a new bridge replaces it.

use crate::endpoint::RemoteEndpoint;
use dashmap::DashMap;
use sensigate_access::RemoteRelay;
use sensigate_core::{
    Error, MessageKind, Namespace, Notification, PatternName, PeerConfig, PeerMessage, PublicKey, RelayCall,
    ResourcePath, Response, Result, NAMESPACE_SEPARATOR,
};
use sensigate_message::AgentCallback;
use sensigate_session::Core;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Invoked with the peer namespace when the link comes up or goes down.
pub type LinkCallback = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct BridgeOptions {
    /// Upper bound on one relayed call.
    pub relay_timeout: Duration,
    /// Upper bound on waiting for the peer's hello.
    pub handshake_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            relay_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl BridgeOptions {
    pub fn from_config(config: &PeerConfig) -> Self {
        Self {
            relay_timeout: Duration::from_millis(config.relay_timeout_ms),
            ..Self::default()
        }
    }
}

struct Peer {
    namespace: Namespace,
    /// Identifier the peer assigned to us.
    remote_id: u32,
}

/// Pushes matches of an agent registered on behalf of the peer back over the link.
struct LinkRecipient {
    agent_id: String,
    outbound: mpsc::UnboundedSender<PeerMessage>,
}

impl AgentCallback for LinkRecipient {
    fn deliver(&self, _agent_id: &str, notification: &Notification) -> Result<()> {
        self.outbound
            .send(PeerMessage::Dispatch {
                agent_id: self.agent_id.clone(),
                notification: notification.clone(),
            })
            .map_err(|_| Error::unavailable("peer link closed"))
    }
}

pub struct RemoteBridge {
    core: Arc<Core>,
    endpoint: Arc<dyn RemoteEndpoint>,
    options: BridgeOptions,
    /// Identifier we assigned to the peer.
    local_id: u32,
    peer: OnceLock<Peer>,
    state: watch::Sender<LinkState>,
    outbound: mpsc::UnboundedSender<PeerMessage>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerMessage>>>,
    pending: DashMap<u64, oneshot::Sender<Response>>,
    calls: AtomicU64,
    /// Local callbacks receiving dispatches for agents we registered on the peer.
    recipients: DashMap<String, Arc<dyn AgentCallback>>,
    recipient_ids: PatternName,
    cancel: CancellationToken,
    on_connected: Mutex<Vec<LinkCallback>>,
    on_disconnected: Mutex<Vec<LinkCallback>>,
}

impl RemoteBridge {
    pub fn new(core: Arc<Core>, endpoint: Arc<dyn RemoteEndpoint>, options: BridgeOptions) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::Disconnected);
        let local_id = core.next_local_id();
        Arc::new(Self {
            core,
            endpoint,
            options,
            local_id,
            peer: OnceLock::new(),
            state,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            pending: DashMap::new(),
            calls: AtomicU64::new(0),
            recipients: DashMap::new(),
            recipient_ids: PatternName::new("$(recipient)"),
            cancel: CancellationToken::new(),
            on_connected: Mutex::new(Vec::new()),
            on_disconnected: Mutex::new(Vec::new()),
        })
    }

    /// Create a bridge over `endpoint` and bring the link up.
    pub async fn connect(core: Arc<Core>, endpoint: Arc<dyn RemoteEndpoint>, options: BridgeOptions) -> Result<Arc<Self>> {
        let bridge = Self::new(core, endpoint, options);
        bridge.start().await?;
        Ok(bridge)
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_id(&self) -> Option<u32> {
        self.peer.get().map(|p| p.remote_id)
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    pub fn on_connected(&self, callback: impl Fn(&str) -> Result<()> + Send + Sync + 'static) {
        lock(&self.on_connected).push(Box::new(callback));
    }

    pub fn on_disconnected(&self, callback: impl Fn(&str) -> Result<()> + Send + Sync + 'static) {
        lock(&self.on_disconnected).push(Box::new(callback));
    }

    /// Resolves once the link is down. Returns at once on a link that was
    /// never started.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == LinkState::Disconnected).await;
    }

    fn peer_namespace(&self) -> Namespace {
        Namespace::new(self.namespace())
    }

    // -- lifecycle --

    /// Exchange namespaces, bind the namespace and start the link tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let outbound_rx = lock(&self.outbound_rx)
            .take()
            .ok_or_else(|| Error::ProtocolError("link already started".into()))?;
        self.state.send_replace(LinkState::Connecting);

        let setup = async {
            let (namespace, remote_id) = self.handshake().await?;
            self.peer
                .set(Peer {
                    namespace: Namespace::new(namespace),
                    remote_id,
                })
                .map_err(|_| Error::ProtocolError("link already started".into()))?;
            let relay: Arc<dyn RemoteRelay> = self.clone();
            self.core.bind_remote(relay)
        };
        if let Err(e) = setup.await {
            warn!("Handshake over {} failed: {}", self.endpoint.describe(), e);
            self.state.send_replace(LinkState::Disconnected);
            self.endpoint.close().await;
            return Err(e);
        }

        tokio::spawn(self.clone().write_loop(outbound_rx));
        tokio::spawn(self.clone().read_loop());
        self.state.send_replace(LinkState::Connected);
        info!(
            "Peer {} connected over {} (local id {})",
            self.namespace(),
            self.endpoint.describe(),
            self.local_id
        );
        self.publish(MessageKind::Connected);
        self.run_callbacks(&self.on_connected, "connected");
        Ok(())
    }

    async fn handshake(&self) -> Result<(String, u32)> {
        let own = self.core.namespace().as_str().to_string();
        self.endpoint
            .send(PeerMessage::Hello {
                namespace: own.clone(),
                local_id: self.local_id,
            })
            .await?;
        let frame = tokio::time::timeout(self.options.handshake_timeout, self.endpoint.recv())
            .await
            .map_err(|_| Error::unavailable("peer handshake timed out"))?;
        match frame {
            Some(Ok(PeerMessage::Hello { namespace, local_id })) => {
                if namespace.is_empty() || namespace.contains(NAMESPACE_SEPARATOR) {
                    return Err(Error::ProtocolError(format!("invalid peer namespace '{}'", namespace)));
                }
                if namespace == own {
                    return Err(Error::ProtocolError(format!("peer announced our own namespace '{}'", own)));
                }
                Ok((namespace, local_id))
            }
            Some(Ok(other)) => Err(Error::ProtocolError(format!("expected hello, got {:?}", other))),
            Some(Err(e)) => Err(e),
            None => Err(Error::unavailable("peer closed the link during handshake")),
        }
    }

    /// Say goodbye and tear the link down. Idempotent.
    pub async fn close(&self) {
        if self.state() == LinkState::Disconnected {
            return;
        }
        if let Err(e) = self.endpoint.send(PeerMessage::Bye).await {
            debug!("bye to {} not sent: {}", self.namespace(), e);
        }
        self.teardown().await;
    }

    async fn teardown(&self) {
        if self.state.send_replace(LinkState::Disconnected) == LinkState::Disconnected {
            return;
        }
        self.cancel.cancel();
        let namespace = self.namespace().to_string();
        // Dropping the senders resolves every waiter with BackendUnavailable.
        self.pending.clear();
        self.recipients.clear();
        let closed = self.core.close_sessions_from(&namespace, self.local_id).await;
        self.endpoint.close().await;
        info!("Peer {} disconnected, {} session(s) closed", namespace, closed);
        self.publish(MessageKind::Disconnected);
        self.run_callbacks(&self.on_disconnected, "disconnected");
    }

    fn publish(&self, kind: MessageKind) {
        let namespace = self.namespace();
        let notification = Notification::new(kind, ResourcePath::provider(namespace)).with_value(json!(namespace));
        self.core.engine().deliver(&notification);
    }

    fn run_callbacks(&self, callbacks: &Mutex<Vec<LinkCallback>>, event: &str) {
        let namespace = self.namespace();
        for callback in lock(callbacks).iter() {
            if let Err(e) = callback(namespace) {
                warn!("{} callback for peer {} failed: {}", event, namespace, e);
            }
        }
    }

    // -- link tasks --

    async fn write_loop(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<PeerMessage>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(message) => {
                        if let Err(e) = self.endpoint.send(message).await {
                            warn!("Send to peer {} failed: {}", self.namespace(), e);
                            self.cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = self.endpoint.recv() => frame,
            };
            match frame {
                Some(Ok(PeerMessage::Bye)) => {
                    info!("Peer {} said bye", self.namespace());
                    break;
                }
                Some(Ok(message)) => self.handle(message),
                Some(Err(e)) => {
                    warn!("Dropping link to {}: {}", self.namespace(), e);
                    break;
                }
                None => {
                    debug!("link to {} closed by transport", self.namespace());
                    break;
                }
            }
        }
        self.teardown().await;
    }

    fn post(&self, message: PeerMessage) {
        if self.outbound.send(message).is_err() {
            debug!("link to {} closed, frame dropped", self.namespace());
        }
    }

    fn handle(self: &Arc<Self>, message: PeerMessage) {
        match message {
            PeerMessage::Call { id, public_key, call } => {
                let bridge = self.clone();
                tokio::spawn(async move {
                    let response = bridge.serve(public_key, call).await;
                    bridge.post(PeerMessage::Reply { id, response });
                });
            }
            PeerMessage::Reply { id, response } => match self.pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(response);
                }
                None => debug!("late reply {} from {}", id, self.namespace()),
            },
            PeerMessage::Dispatch { agent_id, notification } => self.dispatch(&agent_id, notification),
            PeerMessage::Hello { namespace, .. } => {
                warn!("Ignoring repeated hello from {} (announced {})", self.namespace(), namespace)
            }
            PeerMessage::Bye => {}
        }
    }

    /// Serve a call the peer relayed on behalf of one of its callers.
    async fn serve(&self, public_key: PublicKey, call: RelayCall) -> Response {
        let namespace = self.namespace();
        let session = match self.core.remote_session(namespace, self.local_id, &public_key) {
            Ok(session) => session,
            Err(e) => return Response::err(call.method(), call.uri(), &e),
        };
        let recipient: Option<Arc<dyn AgentCallback>> = match &call {
            RelayCall::Subscribe { recipient_id, .. }
            | RelayCall::RegisterAgent {
                agent_id: recipient_id, ..
            } => Some(Arc::new(LinkRecipient {
                agent_id: recipient_id.clone(),
                outbound: self.outbound.clone(),
            })),
            _ => None,
        };
        debug!("{} relayed {} {} for {}", namespace, call.method(), call.uri(), public_key);
        session.execute(call, recipient).await
    }

    /// Hand a notification from the peer to the local recipient, with the
    /// provider qualified by the peer namespace.
    fn dispatch(&self, agent_id: &str, mut notification: Notification) {
        let Some(recipient) = self.recipients.get(agent_id).map(|r| r.clone()) else {
            debug!("dispatch for unknown recipient {} from {}", agent_id, self.namespace());
            return;
        };
        match self.peer_namespace().qualify_path(&notification.path) {
            Ok(path) => notification.path = path,
            Err(e) => {
                warn!("Dropping dispatch from {}: {}", self.namespace(), e);
                return;
            }
        }
        if let Err(e) = recipient.deliver(agent_id, &notification) {
            warn!("recipient {} failed on {}: {}", agent_id, notification.uri(), e);
        }
    }

    /// Qualify the provider names of a `getProviders` / `getAll` answer.
    fn qualify_listing(&self, payload: Value) -> Result<Value> {
        let namespace = self.peer_namespace();
        let Value::Array(items) = payload else {
            return Err(Error::ProtocolError("provider listing is not a list".into()));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::String(name) => Ok(Value::String(namespace.qualify(&name)?)),
                Value::Object(mut provider) => {
                    let qualified = match provider.get("name") {
                        Some(Value::String(name)) => Some(namespace.qualify(name)?),
                        _ => None,
                    };
                    if let Some(name) = qualified {
                        provider.insert("name".into(), Value::String(name));
                    }
                    Ok(Value::Object(provider))
                }
                other => Err(Error::ProtocolError(format!("unexpected provider entry {}", other))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }
}

#[async_trait::async_trait]
impl RemoteRelay for RemoteBridge {
    fn namespace(&self) -> &str {
        self.peer.get().map(|p| p.namespace.as_str()).unwrap_or_default()
    }

    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    async fn relay(&self, public_key: &PublicKey, call: RelayCall) -> Response {
        let method = call.method();
        let uri = call.uri();
        let unavailable = |reason: String| Response::err(method, uri.clone(), &Error::unavailable(reason));
        if !self.is_connected() {
            return unavailable(format!("peer {} is not connected", self.namespace()));
        }
        let listing = matches!(call, RelayCall::GetAll | RelayCall::GetProviders);
        let id = self.calls.fetch_add(1, Ordering::SeqCst);
        let (waiter, reply) = oneshot::channel();
        self.pending.insert(id, waiter);
        if !self.is_connected() {
            self.pending.remove(&id);
            return unavailable(format!("peer {} is not connected", self.namespace()));
        }
        self.post(PeerMessage::Call {
            id,
            public_key: public_key.clone(),
            call,
        });

        let response = match tokio::time::timeout(self.options.relay_timeout, reply).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return unavailable(format!("link to {} lost", self.namespace())),
            Err(_) => {
                self.pending.remove(&id);
                warn!("{} {} on {} timed out", method, uri, self.namespace());
                return unavailable(format!("peer {} did not answer in time", self.namespace()));
            }
        };
        if !listing || !response.is_success() {
            return response;
        }
        let payload = response.payload.clone().unwrap_or(Value::Null);
        Response::from_result(method, uri.clone(), self.qualify_listing(payload))
    }

    fn attach_recipient(&self, recipient: Arc<dyn AgentCallback>) -> String {
        let id = self.recipient_ids.build();
        self.recipients.insert(id.clone(), recipient);
        id
    }

    fn detach_recipient(&self, recipient_id: &str) -> bool {
        self.recipients.remove(recipient_id).is_some()
    }
}

impl std::fmt::Debug for RemoteBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBridge")
            .field("namespace", &self.namespace())
            .field("local_id", &self.local_id)
            .field("state", &self.state())
            .finish()
    }
}
