//! Response envelope and peer-link wire protocol.
//!
//! Wire format (one JSON object per frame):
//!
//!   { "type": "hello", "namespace": "peerA", "local_id": 1 }
//!   { "type": "call", "id": 7, "public_key": "anonymous", "call": { "op": "get", "path": {...} } }
//!   { "type": "reply", "id": 7, "response": { "status": 200, "uri": "/p1/admin/friendlyName/value", ... } }
//!   { "type": "dispatch", "agent_id": "agent_3", "notification": {...} }
//!   { "type": "bye" }

use crate::error::{Error, Result};
use crate::event::Notification;
use crate::path::ResourcePath;
use crate::types::PublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error kind, see [`Error::kind`].
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub trace: Vec<String>,
}

/// Uniform result of every caller-facing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub uri: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(method: impl Into<String>, uri: impl Into<String>, payload: Value) -> Self {
        Self {
            status: 200,
            uri: uri.into(),
            method: method.into(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(method: impl Into<String>, uri: impl Into<String>, error: &Error) -> Self {
        Self {
            status: error.status(),
            uri: uri.into(),
            method: method.into(),
            payload: None,
            error: Some(ErrorBody {
                kind: error.kind().to_string(),
                message: error.to_string(),
                trace: error.trace(),
            }),
        }
    }

    /// Wrap a handler result.
    pub fn from_result(method: impl Into<String>, uri: impl Into<String>, result: Result<Value>) -> Self {
        match result {
            Ok(payload) => Self::ok(method, uri, payload),
            Err(e) => Self::err(method, uri, &e),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    /// Rebuild a typed result from the envelope, e.g. after it crossed a peer link.
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        let body = self.error.unwrap_or_else(|| ErrorBody {
            kind: "Internal".into(),
            message: format!("status {}", self.status),
            trace: Vec::new(),
        });
        Err(error_from_wire(&body.kind, body.message, &self.method, &self.uri))
    }
}

fn error_from_wire(kind: &str, message: String, method: &str, uri: &str) -> Error {
    match kind {
        "NameConflict" => Error::NameConflict {
            kind: "element",
            name: message,
        },
        "NotModifiable" => Error::NotModifiable(message),
        "ConstraintViolation" => Error::ConstraintViolation(message),
        "Forbidden" => Error::forbidden(method, uri),
        "NotFound" => Error::NotFound(message),
        "InvalidCredentials" => Error::InvalidCredentials,
        "AccountConflict" => Error::AccountConflict(message),
        "SessionClosed" => Error::SessionClosed,
        "SessionNotFound" => Error::SessionNotFound(message),
        "BackendUnavailable" => Error::BackendUnavailable(message),
        "ProtocolError" => Error::ProtocolError(message),
        "InvalidValue" => Error::InvalidValue(message),
        _ => Error::Internal(message),
    }
}

// ---------------------------------------------------------------------------
// Relay calls
// ---------------------------------------------------------------------------

/// A northbound operation relayed to a peer gateway. Paths are expressed in
/// the receiving gateway's local identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum RelayCall {
    GetAll,
    GetProviders,
    GetProvider { path: ResourcePath },
    GetServices { path: ResourcePath },
    GetService { path: ResourcePath },
    GetResources { path: ResourcePath },
    GetResource { path: ResourcePath },
    Get { path: ResourcePath },
    Set { path: ResourcePath, value: Value },
    Act {
        path: ResourcePath,
        #[serde(default)]
        args: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Subscribe {
        path: ResourcePath,
        #[serde(default)]
        conditions: Vec<Value>,
        /// Identifier of the agent on the calling side that receives matches.
        recipient_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        path: ResourcePath,
        subscription_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RegisterAgent { agent_id: String, filter: Value },
    #[serde(rename_all = "camelCase")]
    UnregisterAgent { agent_id: String },
    CloseSession,
}

impl RelayCall {
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetAll => "getAll",
            Self::GetProviders => "getProviders",
            Self::GetProvider { .. } => "getProvider",
            Self::GetServices { .. } => "getServices",
            Self::GetService { .. } => "getService",
            Self::GetResources { .. } => "getResources",
            Self::GetResource { .. } => "getResource",
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Act { .. } => "act",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::RegisterAgent { .. } => "registerAgent",
            Self::UnregisterAgent { .. } => "unregisterAgent",
            Self::CloseSession => "closeSession",
        }
    }

    pub fn path(&self) -> Option<&ResourcePath> {
        match self {
            Self::GetProvider { path }
            | Self::GetServices { path }
            | Self::GetService { path }
            | Self::GetResources { path }
            | Self::GetResource { path }
            | Self::Get { path }
            | Self::Set { path, .. }
            | Self::Act { path, .. }
            | Self::Subscribe { path, .. }
            | Self::Unsubscribe { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn path_mut(&mut self) -> Option<&mut ResourcePath> {
        match self {
            Self::GetProvider { path }
            | Self::GetServices { path }
            | Self::GetService { path }
            | Self::GetResources { path }
            | Self::GetResource { path }
            | Self::Get { path }
            | Self::Set { path, .. }
            | Self::Act { path, .. }
            | Self::Subscribe { path, .. }
            | Self::Unsubscribe { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn uri(&self) -> String {
        self.path().map(|p| p.to_string()).unwrap_or_else(|| "/".into())
    }
}

// ---------------------------------------------------------------------------
// Peer link frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Namespace handshake. `local_id` is the identifier the sender assigned
    /// to the receiving peer.
    Hello { namespace: String, local_id: u32 },
    Call {
        id: u64,
        public_key: PublicKey,
        call: RelayCall,
    },
    Reply { id: u64, response: Response },
    Dispatch {
        agent_id: String,
        notification: Notification,
    },
    Bye,
}

impl PeerMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| Error::ProtocolError(format!("malformed frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelope_carries_status_and_kind() {
        let resp = Response::err("SET", "/p1/s1/r1/value", &Error::NotModifiable("value".into()));
        assert_eq!(resp.status, 405);
        assert_eq!(resp.error_kind(), Some("NotModifiable"));
        assert!(!resp.is_success());
        assert!(matches!(resp.into_result(), Err(Error::NotModifiable(_))));
    }

    #[test]
    fn forbidden_is_rebuilt_from_envelope() {
        let resp = Response::err("WRITE", "/p1/s1/r1", &Error::forbidden("WRITE", "/p1/s1/r1"));
        match resp.into_result() {
            Err(Error::Forbidden { method, path }) => {
                assert_eq!(method, "WRITE");
                assert_eq!(path, "/p1/s1/r1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn call_frame_shape() {
        let msg = PeerMessage::Call {
            id: 7,
            public_key: PublicKey::anonymous(),
            call: RelayCall::Get {
                path: ResourcePath::attribute("p1", "admin", "friendlyName", "value"),
            },
        };
        let v: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "call");
        assert_eq!(v["call"]["op"], "get");
        assert_eq!(v["call"]["path"]["provider"], "p1");
    }

    #[test]
    fn subscribe_uses_camel_case_fields() {
        let call: RelayCall = serde_json::from_value(json!({
            "op": "subscribe",
            "path": { "provider": "p1", "service": "s1", "resource": "r1" },
            "recipientId": "agent_0"
        }))
        .unwrap();
        assert_eq!(call.method(), "subscribe");
        assert_eq!(call.uri(), "/p1/s1/r1");
    }

    #[test]
    fn garbage_frame_is_protocol_error() {
        assert!(matches!(
            PeerMessage::from_json("{\"type\":\"nope\"}"),
            Err(Error::ProtocolError(_))
        ));
    }
}
