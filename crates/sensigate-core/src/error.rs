//! Error types for Sensigate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} already exists: {name}")]
    NameConflict { kind: &'static str, name: String },

    #[error("not modifiable: {0}")]
    NotModifiable(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("forbidden: {method} on {path}")]
    Forbidden { method: String, path: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account conflict: {0}")]
    AccountConflict(String),

    #[error("session closed")]
    SessionClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn name_conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NameConflict {
            kind,
            name: name.into(),
        }
    }

    pub fn forbidden(method: impl std::fmt::Display, path: impl Into<String>) -> Self {
        Self::Forbidden {
            method: method.to_string(),
            path: path.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable(reason.into())
    }

    /// HTTP-modeled status code carried by the response envelope.
    pub fn status(&self) -> u16 {
        match self {
            Self::NameConflict { .. } | Self::AccountConflict(_) => 409,
            Self::NotModifiable(_) => 405,
            Self::ConstraintViolation(_) | Self::InvalidValue(_) => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound(_) => 404,
            Self::InvalidCredentials | Self::SessionNotFound(_) => 401,
            Self::SessionClosed => 410,
            Self::ProtocolError(_) => 502,
            Self::BackendUnavailable(_) => 503,
            Self::Config(_) | Self::Io(_) | Self::Json(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable kind, used on the wire to rebuild the error
    /// on the other side of a peer link.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NameConflict { .. } => "NameConflict",
            Self::NotModifiable(_) => "NotModifiable",
            Self::ConstraintViolation(_) => "ConstraintViolation",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::AccountConflict(_) => "AccountConflict",
            Self::SessionClosed => "SessionClosed",
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::BackendUnavailable(_) => "BackendUnavailable",
            Self::ProtocolError(_) => "ProtocolError",
            Self::InvalidValue(_) => "InvalidValue",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Internal(_) => "Internal",
        }
    }

    /// The `source()` chain rendered top-down, first entry is `self`.
    pub fn trace(&self) -> Vec<String> {
        let mut trace = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        trace
    }
}
