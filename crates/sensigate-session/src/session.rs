//! Caller sessions.
//!
//! A session binds one identity to an access view of the tree. Dispatch
//! tables are decorated with the view on first use and cached until the
//! model changes shape. Every northbound operation is expressed as a
//! [`RelayCall`] and goes through [`Session::execute`], which serves it
//! locally or forwards it to the peer owning the addressed namespace.

use crate::identity::IdentityStore;
use crate::registry::SessionRegistry;
use sensigate_access::{AccessView, DispatchTable, Dispatcher, Invocation, MethodKind, RemoteRelay, Route};
use sensigate_core::{Error, IdentityKind, PublicKey, RelayCall, ResourcePath, Response, Result, SessionToken};
use sensigate_message::{AgentCallback, Filter};
use sensigate_model::VALUE;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Who a session acts for.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub kind: IdentityKind,
    pub public_key: PublicKey,
    pub login: Option<String>,
    /// Namespace of the peer this session serves relayed calls for.
    pub origin: Option<String>,
    /// Local id of the peer link that opened it.
    pub link: Option<u32>,
    pub view: AccessView,
}

#[derive(Default)]
struct TableCache {
    shape: u64,
    tables: HashMap<String, Arc<DispatchTable>>,
}

/// Agents and subscriptions a session created, torn down on close.
#[derive(Debug, Clone)]
enum Owned {
    Local {
        id: String,
        /// Identifier the registering peer knows the agent by.
        alias: Option<String>,
        resource: Option<ResourcePath>,
    },
    Remote {
        namespace: String,
        recipient_id: String,
        /// Peer-side subscription, absent for agents.
        subscription: Option<(ResourcePath, String)>,
    },
}

pub struct Session {
    token: SessionToken,
    identity: SessionIdentity,
    dispatcher: Arc<Dispatcher>,
    identities: Arc<dyn IdentityStore>,
    registry: Weak<SessionRegistry>,
    closed: AtomicBool,
    cache: Mutex<TableCache>,
    owned: Mutex<Vec<Owned>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token)
            .field("kind", &self.identity.kind)
            .field("public_key", &self.identity.public_key)
            .field("origin", &self.identity.origin)
            .field("link", &self.identity.link)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        identity: SessionIdentity,
        dispatcher: Arc<Dispatcher>,
        identities: Arc<dyn IdentityStore>,
        registry: Weak<SessionRegistry>,
    ) -> Self {
        Self {
            token: SessionToken::generate(),
            identity,
            dispatcher,
            identities,
            registry,
            closed: AtomicBool::new(false),
            cache: Mutex::new(TableCache::default()),
            owned: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn kind(&self) -> IdentityKind {
        self.identity.kind
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.identity.public_key
    }

    pub fn login(&self) -> Option<&str> {
        self.identity.login.as_deref()
    }

    pub fn origin(&self) -> Option<&str> {
        self.identity.origin.as_deref()
    }

    pub fn link(&self) -> Option<u32> {
        self.identity.link
    }

    pub fn view(&self) -> &AccessView {
        &self.identity.view
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Anonymous-only capabilities.
    pub fn as_anonymous(&self) -> Option<AnonymousSession<'_>> {
        (self.kind() == IdentityKind::Anonymous).then_some(AnonymousSession { session: self })
    }

    /// Capabilities of a session opened with account credentials.
    pub fn as_authenticated(&self) -> Option<AuthenticatedSession<'_>> {
        match (self.kind(), self.login()) {
            (IdentityKind::Authenticated, Some(login)) => Some(AuthenticatedSession { session: self, login }),
            _ => None,
        }
    }

    /// Number of agents and subscriptions held by this session.
    pub fn owned_count(&self) -> usize {
        lock(&self.owned).len()
    }

    // -- accessible view cache --

    async fn table(&self, path: &ResourcePath) -> Result<Arc<DispatchTable>> {
        let key = path.element().to_string();
        let shape = self.dispatcher.model().shape_version();
        {
            let mut cache = lock(&self.cache);
            if cache.shape != shape {
                cache.tables.clear();
                cache.shape = shape;
            }
            if let Some(table) = cache.tables.get(&key) {
                return Ok(table.clone());
            }
        }
        let table = Arc::new(self.dispatcher.accessible_table(path, self.view()).await?);
        let mut cache = lock(&self.cache);
        if cache.shape == shape {
            cache.tables.insert(key, table.clone());
        }
        Ok(table)
    }

    /// Number of decorated tables currently cached.
    pub fn cached_tables(&self) -> usize {
        lock(&self.cache).tables.len()
    }

    fn invocation(&self, args: Vec<Value>) -> Invocation {
        Invocation::new(self.public_key().clone(), args)
    }

    fn track(&self, owned: Owned) {
        lock(&self.owned).push(owned);
    }

    fn untrack(&self, matches: impl Fn(&Owned) -> bool) -> Option<Owned> {
        let mut owned = lock(&self.owned);
        let index = owned.iter().position(matches)?;
        Some(owned.remove(index))
    }

    // -- execution --

    /// Run one operation. `recipient` receives notifications for `subscribe`
    /// and `registerAgent`.
    pub async fn execute(&self, call: RelayCall, recipient: Option<Arc<dyn AgentCallback>>) -> Response {
        let method = call.method();
        let uri = call.uri();
        if let Err(e) = self.ensure_open() {
            return Response::err(method, uri, &e);
        }
        let route = match call.path() {
            Some(path) => match self.dispatcher.route(path) {
                Ok(route) => Some(route),
                Err(e) => return Response::err(method, uri, &e),
            },
            None => None,
        };
        match route {
            Some(Route::Remote(relay, stripped)) => {
                if self.origin().is_some() {
                    let e = Error::ProtocolError(format!("{} cannot be relayed again", uri));
                    return Response::err(method, uri, &e);
                }
                let mut call = call;
                if let Some(path) = call.path_mut() {
                    *path = stripped;
                }
                self.execute_remote(relay, call, recipient).await
            }
            Some(Route::Local(local)) => {
                let mut call = call;
                if let Some(path) = call.path_mut() {
                    *path = local;
                }
                Response::from_result(method, uri, self.serve_local(call, recipient).await)
            }
            None => {
                let merge = matches!(call, RelayCall::GetAll | RelayCall::GetProviders) && self.origin().is_none();
                let result = self.serve_local(call.clone(), recipient).await;
                match result {
                    Ok(Value::Array(mut local)) if merge => {
                        self.merge_remotes(&call, &mut local).await;
                        Response::ok(method, uri, Value::Array(local))
                    }
                    other => Response::from_result(method, uri, other),
                }
            }
        }
    }

    /// Append every connected peer's answer to `call`. Peers answer with
    /// identifiers already qualified by their bridge.
    async fn merge_remotes(&self, call: &RelayCall, into: &mut Vec<Value>) {
        for relay in self.dispatcher.remotes() {
            if !relay.is_connected() {
                continue;
            }
            let response = relay.relay(self.public_key(), call.clone()).await;
            match response.into_result() {
                Ok(Value::Array(items)) => into.extend(items),
                Ok(other) => warn!("peer {} answered {} with {}", relay.namespace(), call.method(), other),
                Err(e) => warn!("peer {} skipped in {}: {}", relay.namespace(), call.method(), e),
            }
        }
    }

    async fn serve_local(&self, call: RelayCall, recipient: Option<Arc<dyn AgentCallback>>) -> Result<Value> {
        let dispatcher = &self.dispatcher;
        let view = self.view();
        match call {
            RelayCall::GetAll => Ok(dispatcher.describe_all(view).await),
            RelayCall::GetProviders => Ok(dispatcher.describe_providers(view).await),
            RelayCall::GetProvider { path } => dispatcher.describe_provider(&path, view).await,
            RelayCall::GetServices { path } => dispatcher.describe_services(&path, view).await,
            RelayCall::GetService { path } => dispatcher.describe_service(&path, view).await,
            RelayCall::GetResources { path } => dispatcher.describe_resources(&path, view).await,
            RelayCall::GetResource { path } => dispatcher.describe_resource(&path, view).await,
            RelayCall::Get { path } => {
                let args = path.attribute.iter().map(|a| Value::String(a.clone())).collect();
                self.table(&path).await?.call(MethodKind::Read, self.invocation(args)).await
            }
            RelayCall::Set { path, value } => {
                let attribute = path.attribute.clone().unwrap_or_else(|| VALUE.to_string());
                self.table(&path)
                    .await?
                    .call(MethodKind::Write, self.invocation(vec![Value::String(attribute), value]))
                    .await
            }
            RelayCall::Act { path, args } => self.table(&path).await?.call(MethodKind::Act, self.invocation(args)).await,
            RelayCall::Subscribe {
                path,
                conditions,
                recipient_id,
            } => {
                let recipient = recipient.ok_or_else(|| Error::InvalidValue("subscribe requires a recipient".into()))?;
                let payload = self
                    .table(&path)
                    .await?
                    .call(MethodKind::Subscribe, self.invocation(conditions).with_recipient(recipient))
                    .await?;
                if let Some(id) = payload.get("subscriptionId").and_then(Value::as_str) {
                    self.track(Owned::Local {
                        id: id.to_string(),
                        alias: (!recipient_id.is_empty()).then_some(recipient_id),
                        resource: path.resource.is_some().then(|| path.element()),
                    });
                }
                Ok(payload)
            }
            RelayCall::Unsubscribe { path, subscription_id } => {
                let payload = self
                    .table(&path)
                    .await?
                    .call(MethodKind::Unsubscribe, self.invocation(vec![json!(subscription_id)]))
                    .await?;
                self.untrack(|o| matches!(o, Owned::Local { id, .. } if *id == subscription_id));
                Ok(payload)
            }
            RelayCall::RegisterAgent { agent_id, filter } => {
                let recipient = recipient.ok_or_else(|| Error::InvalidValue("registerAgent requires a recipient".into()))?;
                let filter = Filter::from_json(&filter)?;
                let id = dispatcher
                    .engine()
                    .register(filter, recipient, Some(self.public_key().clone()));
                self.track(Owned::Local {
                    id: id.clone(),
                    alias: (!agent_id.is_empty()).then_some(agent_id),
                    resource: None,
                });
                Ok(json!({ "agentId": id }))
            }
            RelayCall::UnregisterAgent { agent_id } => {
                let owned = self.untrack(|o| {
                    matches!(o, Owned::Local { id, alias, resource: None }
                        if *id == agent_id || alias.as_deref() == Some(agent_id.as_str()))
                });
                match owned {
                    Some(Owned::Local { id, .. }) => {
                        dispatcher.engine().unregister(&id);
                        Ok(json!({ "agentId": id }))
                    }
                    _ => Err(Error::not_found(format!("agent {}", agent_id))),
                }
            }
            RelayCall::CloseSession => {
                self.close().await;
                Ok(json!({ "closed": true }))
            }
        }
    }

    async fn execute_remote(
        &self,
        relay: Arc<dyn RemoteRelay>,
        mut call: RelayCall,
        recipient: Option<Arc<dyn AgentCallback>>,
    ) -> Response {
        let namespace = relay.namespace().to_string();
        let method = call.method();
        let uri = call.uri();
        let attached = if let RelayCall::Subscribe { recipient_id, .. } = &mut call {
            let Some(recipient) = recipient else {
                return Response::err(method, uri, &Error::InvalidValue("subscribe requires a recipient".into()));
            };
            let id = relay.attach_recipient(recipient);
            *recipient_id = id.clone();
            Some(id)
        } else {
            None
        };
        let response = relay.relay(self.public_key(), call.clone()).await;
        match (&call, attached) {
            (RelayCall::Subscribe { path, .. }, Some(recipient_id)) => {
                let subscription = response
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("subscriptionId"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match subscription {
                    Some(id) if response.is_success() => self.track(Owned::Remote {
                        namespace,
                        recipient_id,
                        subscription: Some((path.clone(), id)),
                    }),
                    _ => {
                        relay.detach_recipient(&recipient_id);
                    }
                }
            }
            (RelayCall::Unsubscribe { subscription_id, .. }, _) if response.is_success() => {
                let owned = self.untrack(|o| {
                    matches!(o, Owned::Remote { namespace: ns, subscription: Some((_, id)), .. }
                        if *ns == namespace && id == subscription_id)
                });
                if let Some(Owned::Remote { recipient_id, .. }) = owned {
                    relay.detach_recipient(&recipient_id);
                }
            }
            _ => {}
        }
        response
    }

    /// Register an agent on the peer owning `namespace`. Matches on the peer
    /// are dispatched back over the link to `callback`. Returns the local
    /// identifier of the agent.
    pub async fn register_remote_agent(
        &self,
        namespace: &str,
        filter: Value,
        callback: Arc<dyn AgentCallback>,
    ) -> Result<String> {
        self.ensure_open()?;
        let relay = self
            .dispatcher
            .remote(namespace)
            .ok_or_else(|| Error::unavailable(format!("no peer bound for namespace '{}'", namespace)))?;
        let recipient_id = relay.attach_recipient(callback);
        let call = RelayCall::RegisterAgent {
            agent_id: recipient_id.clone(),
            filter,
        };
        if let Err(e) = relay.relay(self.public_key(), call).await.into_result() {
            relay.detach_recipient(&recipient_id);
            return Err(e);
        }
        self.track(Owned::Remote {
            namespace: namespace.to_string(),
            recipient_id: recipient_id.clone(),
            subscription: None,
        });
        Ok(recipient_id)
    }

    /// Unregister an agent registered through this session, locally or on a peer.
    pub async fn unregister_agent(&self, agent_id: &str) -> Response {
        let remote = self.untrack(|o| {
            matches!(o, Owned::Remote { recipient_id, subscription: None, .. } if recipient_id == agent_id)
        });
        match remote {
            Some(Owned::Remote { namespace, recipient_id, .. }) => {
                let result = match self.dispatcher.remote(&namespace) {
                    Some(relay) => {
                        relay.detach_recipient(&recipient_id);
                        relay
                            .relay(self.public_key(), RelayCall::UnregisterAgent { agent_id: recipient_id })
                            .await
                            .into_result()
                    }
                    None => Err(Error::unavailable(format!("no peer bound for namespace '{}'", namespace))),
                };
                Response::from_result("unregisterAgent", "/", result)
            }
            _ => {
                self.execute(RelayCall::UnregisterAgent { agent_id: agent_id.to_string() }, None)
                    .await
            }
        }
    }

    /// Close the session. Idempotent. Agents and subscriptions it created are
    /// torn down; operations already admitted run to completion.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.cache).tables.clear();
        let owned = std::mem::take(&mut *lock(&self.owned));
        for entry in owned {
            match entry {
                Owned::Local { id, resource, .. } => {
                    self.dispatcher.engine().unregister(&id);
                    if let Some(path) = resource {
                        if let Ok(resource) = self.dispatcher.model().resolve_resource(&path).await {
                            resource.remove_subscription(&id).await;
                        }
                    }
                }
                Owned::Remote {
                    namespace,
                    recipient_id,
                    subscription,
                } => {
                    let Some(relay) = self.dispatcher.remote(&namespace) else {
                        continue;
                    };
                    relay.detach_recipient(&recipient_id);
                    if !relay.is_connected() {
                        continue;
                    }
                    let call = match subscription {
                        Some((path, subscription_id)) => RelayCall::Unsubscribe { path, subscription_id },
                        None => RelayCall::UnregisterAgent { agent_id: recipient_id },
                    };
                    let response = relay.relay(self.public_key(), call).await;
                    if !response.is_success() {
                        debug!("peer {} teardown for closed session failed: {}", namespace, response.status);
                    }
                }
            }
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.token);
        }
        info!("Session {} closed ({})", self.token, self.public_key());
    }
}

/// Extensions of anonymous sessions.
pub struct AnonymousSession<'a> {
    session: &'a Session,
}

impl AnonymousSession<'_> {
    pub fn register(&self, login: &str, password: &str) -> Result<()> {
        self.session.ensure_open()?;
        self.session.identities.register(login, password).map(|_| ())
    }

    /// Issue a reset token for the account's endpoint.
    pub fn request_password_reset(&self, login: &str) -> Result<String> {
        self.session.ensure_open()?;
        self.session.identities.request_reset(login)
    }

    /// Reset a password with a token and close every session of the account.
    pub async fn reset_password(&self, token: &str, password: &str) -> Result<()> {
        self.session.ensure_open()?;
        let login = self.session.identities.reset_password(token, password)?;
        if let Some(registry) = self.session.registry.upgrade() {
            registry.close_where(|s| s.login() == Some(login.as_str())).await;
        }
        Ok(())
    }
}

/// Extensions of sessions opened with account credentials.
pub struct AuthenticatedSession<'a> {
    session: &'a Session,
    login: &'a str,
}

impl AuthenticatedSession<'_> {
    pub fn login(&self) -> &str {
        self.login
    }

    /// Change the account password and close the account's other sessions.
    pub async fn change_password(&self, old: &str, new: &str) -> Result<()> {
        self.session.ensure_open()?;
        self.session.identities.change_password(self.login, old, new)?;
        if let Some(registry) = self.session.registry.upgrade() {
            let token = self.session.token().clone();
            let login = self.login;
            registry
                .close_where(|s| s.login() == Some(login) && s.token() != &token)
                .await;
        }
        Ok(())
    }
}
