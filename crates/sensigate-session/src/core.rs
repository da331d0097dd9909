//! The gateway core: session creation and the public-key addressed
//! northbound surface.

use crate::identity::{application_key, IdentityStore, MemoryIdentityStore};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionIdentity};
use sensigate_access::{AccessPolicy, Dispatcher, RemoteRelay};
use sensigate_core::{
    Error, GatewayConfig, IdentityKind, Namespace, PublicKey, RelayCall, ResourcePath, Response, Result, SessionToken,
};
use sensigate_message::{AgentCallback, NotificationEngine};
use sensigate_model::ResourceModel;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Core {
    dispatcher: Arc<Dispatcher>,
    policy: AccessPolicy,
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<SessionRegistry>,
    local_ids: AtomicU32,
}

impl Core {
    pub fn new(
        namespace: Namespace,
        model: Arc<ResourceModel>,
        engine: Arc<NotificationEngine>,
        policy: AccessPolicy,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(namespace, model, engine)),
            policy,
            identities,
            sessions: Arc::new(SessionRegistry::new()),
            local_ids: AtomicU32::new(1),
        }
    }

    /// Build a core with the configured policy and bootstrap accounts.
    pub fn from_config(config: &GatewayConfig, model: Arc<ResourceModel>, engine: Arc<NotificationEngine>) -> Result<Self> {
        let policy = AccessPolicy::from_config(&config.security)?;
        let identities = Arc::new(MemoryIdentityStore::from_config(&config.security.accounts)?);
        Ok(Self::new(Namespace::new(&config.namespace), model, engine, policy, identities))
    }

    pub fn namespace(&self) -> &Namespace {
        self.dispatcher.namespace()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn model(&self) -> &Arc<ResourceModel> {
        self.dispatcher.model()
    }

    pub fn engine(&self) -> &Arc<NotificationEngine> {
        self.dispatcher.engine()
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    fn open(&self, identity: SessionIdentity) -> Arc<Session> {
        let session = Arc::new(Session::new(
            identity,
            self.dispatcher.clone(),
            self.identities.clone(),
            Arc::downgrade(&self.sessions),
        ));
        debug!(
            "Session {} opened for {} ({})",
            session.token(),
            session.public_key(),
            session.kind()
        );
        self.sessions.insert(session.clone());
        session
    }

    // -- session creation --

    /// A fresh anonymous session. Always succeeds.
    pub fn get_anonymous_session(&self) -> Arc<Session> {
        self.open(SessionIdentity {
            kind: IdentityKind::Anonymous,
            public_key: PublicKey::anonymous(),
            login: None,
            origin: None,
            link: None,
            view: self.policy.base_view(IdentityKind::Anonymous),
        })
    }

    pub fn get_session(&self, token: &str) -> Result<Arc<Session>> {
        self.sessions
            .get(&SessionToken::new(token))
            .filter(|s| !s.is_closed())
            .ok_or_else(|| Error::SessionNotFound(token.to_string()))
    }

    pub fn login(&self, login: &str, password: &str) -> Result<Arc<Session>> {
        let account = self.identities.authenticate(login, password)?;
        let view = self.policy.view(IdentityKind::Authenticated, Some(&account.policy))?;
        info!("Account {} logged in", login);
        Ok(self.open(SessionIdentity {
            kind: IdentityKind::Authenticated,
            public_key: account.public_key,
            login: Some(account.login),
            origin: None,
            link: None,
            view,
        }))
    }

    /// A session keyed by an application-private identifier.
    pub fn application_session(&self, app_id: &str) -> Result<Arc<Session>> {
        if app_id.is_empty() {
            return Err(Error::InvalidValue("application identifier must not be empty".into()));
        }
        Ok(self.open(SessionIdentity {
            kind: IdentityKind::Application,
            public_key: application_key(app_id),
            login: None,
            origin: None,
            link: None,
            view: self.policy.base_view(IdentityKind::Application),
        }))
    }

    // -- remote namespaces --

    /// Allocate the local identifier of a newly connected peer.
    pub fn next_local_id(&self) -> u32 {
        self.local_ids.fetch_add(1, Ordering::SeqCst)
    }

    pub fn bind_remote(&self, relay: Arc<dyn RemoteRelay>) -> Result<()> {
        self.dispatcher.bind_remote(relay)
    }

    pub fn unbind_remote(&self, namespace: &str) -> bool {
        self.dispatcher.unbind_remote(namespace)
    }

    /// The session serving calls a peer relays on behalf of `public_key`.
    /// Anonymous callers of different peers never share a session.
    pub fn remote_session(&self, namespace: &str, local_id: u32, public_key: &PublicKey) -> Result<Arc<Session>> {
        let key = if public_key.is_anonymous() {
            PublicKey::new(format!("{}_remote{}", public_key, local_id))
        } else {
            public_key.clone()
        };
        let existing = self
            .sessions
            .find(|s| s.link() == Some(local_id) && s.origin() == Some(namespace) && s.public_key() == &key && !s.is_closed());
        if let Some(session) = existing.into_iter().next() {
            return Ok(session);
        }
        let identity = match self.identities.account_by_key(public_key) {
            Some(account) => SessionIdentity {
                kind: IdentityKind::Authenticated,
                public_key: key,
                login: Some(account.login.clone()),
                origin: Some(namespace.to_string()),
                link: Some(local_id),
                view: self.policy.view(IdentityKind::Authenticated, Some(&account.policy))?,
            },
            None => SessionIdentity {
                kind: IdentityKind::Anonymous,
                public_key: key,
                login: None,
                origin: Some(namespace.to_string()),
                link: Some(local_id),
                view: self.policy.base_view(IdentityKind::Anonymous),
            },
        };
        Ok(self.open(identity))
    }

    /// Close every session established by way of the peer link `local_id`
    /// to `namespace`. Sessions of a newer link to the same namespace stay open.
    pub async fn close_sessions_from(&self, namespace: &str, local_id: u32) -> usize {
        let closed = self
            .sessions
            .close_where(|s| s.origin() == Some(namespace) && s.link() == Some(local_id))
            .await;
        if closed > 0 {
            info!("Closed {} session(s) from peer {}", closed, namespace);
        }
        closed
    }

    /// Close every live session bound to `public_key`.
    pub async fn close_session(&self, public_key: &PublicKey) -> usize {
        self.sessions.close_where(|s| s.public_key() == public_key).await
    }

    // -- northbound surface addressed by public key --

    /// The caller's live session, or a fresh anonymous one for anonymous keys.
    fn session_for(&self, public_key: &PublicKey) -> Result<Arc<Session>> {
        let live = self
            .sessions
            .find(|s| s.origin().is_none() && s.public_key() == public_key && !s.is_closed());
        if let Some(session) = live.into_iter().next() {
            return Ok(session);
        }
        if public_key.is_anonymous() {
            return Ok(self.get_anonymous_session());
        }
        Err(Error::SessionNotFound(public_key.to_string()))
    }

    async fn call(&self, public_key: &PublicKey, call: RelayCall, recipient: Option<Arc<dyn AgentCallback>>) -> Response {
        match self.session_for(public_key) {
            Ok(session) => session.execute(call, recipient).await,
            Err(e) => Response::err(call.method(), call.uri(), &e),
        }
    }

    pub async fn get_all(&self, public_key: &PublicKey) -> Response {
        self.call(public_key, RelayCall::GetAll, None).await
    }

    pub async fn get_providers(&self, public_key: &PublicKey) -> Response {
        self.call(public_key, RelayCall::GetProviders, None).await
    }

    pub async fn get_provider(&self, public_key: &PublicKey, provider: &str) -> Response {
        let path = ResourcePath::provider(provider);
        self.call(public_key, RelayCall::GetProvider { path }, None).await
    }

    pub async fn get_services(&self, public_key: &PublicKey, provider: &str) -> Response {
        let path = ResourcePath::provider(provider);
        self.call(public_key, RelayCall::GetServices { path }, None).await
    }

    pub async fn get_service(&self, public_key: &PublicKey, provider: &str, service: &str) -> Response {
        let path = ResourcePath::service(provider, service);
        self.call(public_key, RelayCall::GetService { path }, None).await
    }

    pub async fn get_resources(&self, public_key: &PublicKey, provider: &str, service: &str) -> Response {
        let path = ResourcePath::service(provider, service);
        self.call(public_key, RelayCall::GetResources { path }, None).await
    }

    pub async fn get_resource(&self, public_key: &PublicKey, provider: &str, service: &str, resource: &str) -> Response {
        let path = ResourcePath::resource(provider, service, resource);
        self.call(public_key, RelayCall::GetResource { path }, None).await
    }

    pub async fn get(&self, public_key: &PublicKey, path: ResourcePath) -> Response {
        self.call(public_key, RelayCall::Get { path }, None).await
    }

    pub async fn set(&self, public_key: &PublicKey, path: ResourcePath, value: Value) -> Response {
        self.call(public_key, RelayCall::Set { path, value }, None).await
    }

    pub async fn act(&self, public_key: &PublicKey, path: ResourcePath, args: Vec<Value>) -> Response {
        self.call(public_key, RelayCall::Act { path, args }, None).await
    }

    pub async fn subscribe(
        &self,
        public_key: &PublicKey,
        path: ResourcePath,
        recipient: Arc<dyn AgentCallback>,
        conditions: Vec<Value>,
    ) -> Response {
        let call = RelayCall::Subscribe {
            path,
            conditions,
            recipient_id: String::new(),
        };
        self.call(public_key, call, Some(recipient)).await
    }

    pub async fn unsubscribe(&self, public_key: &PublicKey, path: ResourcePath, subscription_id: &str) -> Response {
        let call = RelayCall::Unsubscribe {
            path,
            subscription_id: subscription_id.to_string(),
        };
        self.call(public_key, call, None).await
    }

    pub async fn register_agent(&self, public_key: &PublicKey, filter: Value, callback: Arc<dyn AgentCallback>) -> Response {
        let call = RelayCall::RegisterAgent {
            agent_id: String::new(),
            filter,
        };
        self.call(public_key, call, Some(callback)).await
    }

    pub async fn unregister_agent(&self, public_key: &PublicKey, agent_id: &str) -> Response {
        match self.session_for(public_key) {
            Ok(session) => session.unregister_agent(agent_id).await,
            Err(e) => Response::err("unregisterAgent", "/", &e),
        }
    }
}
