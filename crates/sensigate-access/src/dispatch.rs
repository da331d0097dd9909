//! Per-element dispatch tables.
//!
//! Every provider, service and resource is reachable through a table that
//! maps each [`MethodKind`] it supports to a [`MethodHandler`]. A caller
//! names the method, the table finds the handler and wraps the outcome in a
//! [`Response`] envelope.

use crate::method::MethodKind;
use sensigate_core::{Error, PublicKey, ResourcePath, Response, Result};
use sensigate_message::AgentCallback;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Arguments of one method call.
#[derive(Clone)]
pub struct Invocation {
    pub public_key: PublicKey,
    pub args: Vec<Value>,
    /// Where SUBSCRIBE delivers notifications.
    pub recipient: Option<Arc<dyn AgentCallback>>,
}

impl Invocation {
    pub fn new(public_key: PublicKey, args: Vec<Value>) -> Self {
        Self {
            public_key,
            args,
            recipient: None,
        }
    }

    pub fn with_recipient(mut self, recipient: Arc<dyn AgentCallback>) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("public_key", &self.public_key)
            .field("args", &self.args)
            .field("recipient", &self.recipient.is_some())
            .finish()
    }
}

/// The behavior bound to one method kind of one element.
#[async_trait::async_trait]
pub trait MethodHandler: Send + Sync {
    fn kind(&self) -> MethodKind;

    async fn invoke(&self, invocation: Invocation) -> Result<Value>;
}

/// A single argument that is itself an array is spread into the argument list.
pub fn spread_args(mut args: Vec<Value>) -> Vec<Value> {
    if args.len() == 1 && args[0].is_array() {
        if let Some(Value::Array(items)) = args.pop() {
            return items;
        }
    }
    args
}

#[derive(Clone)]
pub struct DispatchTable {
    path: ResourcePath,
    handlers: HashMap<MethodKind, Arc<dyn MethodHandler>>,
}

impl DispatchTable {
    pub fn new(path: ResourcePath) -> Self {
        Self {
            path,
            handlers: HashMap::new(),
        }
    }

    /// Bind a handler. Replaces any handler already bound to the same kind.
    pub fn bind(&mut self, handler: impl MethodHandler + 'static) {
        self.bind_arc(Arc::new(handler));
    }

    pub fn bind_arc(&mut self, handler: Arc<dyn MethodHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn remove(&mut self, kind: MethodKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    pub fn get(&self, kind: MethodKind) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn uri(&self) -> String {
        self.path.to_string()
    }

    /// Bound kinds in canonical order.
    pub fn kinds(&self) -> Vec<MethodKind> {
        MethodKind::all()
            .iter()
            .copied()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    /// Call the handler bound to `kind`; NotFound when none is bound.
    pub async fn call(&self, kind: MethodKind, mut invocation: Invocation) -> Result<Value> {
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| Error::not_found(format!("{} has no {} method", self.path, kind)))?;
        invocation.args = spread_args(invocation.args);
        debug!("{} {} ({} argument(s))", kind, self.path, invocation.args.len());
        handler.invoke(invocation).await
    }

    /// Invoke a method by name and wrap the outcome into a response envelope.
    pub async fn invoke(&self, method: &str, invocation: Invocation) -> Response {
        let result = match method.parse::<MethodKind>() {
            Ok(kind) => self.call(kind, invocation).await,
            Err(e) => Err(e),
        };
        Response::from_result(method.to_uppercase(), self.uri(), result)
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("path", &self.path.to_string())
            .field("kinds", &self.kinds())
            .finish()
    }
}
