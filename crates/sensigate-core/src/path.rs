//! Resource paths (`/provider/service/resource/attribute`) and namespace
//! qualification of provider identifiers crossing a peer link.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub const PATH_SEPARATOR: char = '/';
pub const NAMESPACE_SEPARATOR: char = ':';

/// A path into the resource tree. Each level is optional from the right:
/// a provider path has no service, a service path has no resource, etc.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl ResourcePath {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            service: None,
            resource: None,
            attribute: None,
        }
    }

    pub fn service(provider: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Self::provider(provider)
        }
    }

    pub fn resource(
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            resource: Some(resource.into()),
            ..Self::service(provider, service)
        }
    }

    pub fn attribute(
        provider: impl Into<String>,
        service: impl Into<String>,
        resource: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            attribute: Some(attribute.into()),
            ..Self::resource(provider, service, resource)
        }
    }

    /// Parse `/p`, `/p/s`, `/p/s/r` or `/p/s/r/a`. The leading slash is optional.
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim_start_matches(PATH_SEPARATOR);
        let segments: Vec<&str> = trimmed.split(PATH_SEPARATOR).collect();
        if trimmed.is_empty() || segments.len() > 4 || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidValue(format!("malformed path: {}", uri)));
        }
        let mut it = segments.into_iter().map(String::from);
        let provider = it.next().unwrap_or_default();
        Ok(Self {
            provider,
            service: it.next(),
            resource: it.next(),
            attribute: it.next(),
        })
    }

    /// The same path without its attribute segment.
    pub fn element(&self) -> Self {
        Self {
            attribute: None,
            ..self.clone()
        }
    }

    pub fn with_provider(&self, provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..self.clone()
        }
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.provider.as_str()];
        segments.extend(
            [&self.service, &self.resource, &self.attribute]
                .into_iter()
                .map_while(|s| s.as_deref()),
        );
        segments
    }
}

impl std::fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in self.segments() {
            write!(f, "{}{}", PATH_SEPARATOR, segment)?;
        }
        Ok(())
    }
}

/// Split `ns:provider` into its namespace and local part.
pub fn split_namespace(id: &str) -> (Option<&str>, &str) {
    match id.split_once(NAMESPACE_SEPARATOR) {
        Some((ns, local)) => (Some(ns), local),
        None => (None, id),
    }
}

/// A gateway namespace. Qualification is applied exactly once, at the
/// boundary where an identifier crosses a peer link.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `id` is qualified with this namespace.
    pub fn owns(&self, id: &str) -> bool {
        matches!(split_namespace(id), (Some(ns), _) if ns == self.0)
    }

    /// Prefix a provider identifier with this namespace. Identifiers already
    /// carrying this namespace are returned unchanged; identifiers carrying a
    /// foreign namespace are rejected instead of being double-prefixed.
    pub fn qualify(&self, id: &str) -> Result<String> {
        match split_namespace(id) {
            (None, local) => Ok(format!("{}{}{}", self.0, NAMESPACE_SEPARATOR, local)),
            (Some(ns), _) if ns == self.0 => Ok(id.to_string()),
            (Some(ns), _) => Err(Error::ProtocolError(format!(
                "identifier '{}' already qualified with namespace '{}'",
                id, ns
            ))),
        }
    }

    /// Remove this namespace from a qualified identifier. The remainder must be
    /// a plain local identifier.
    pub fn strip<'a>(&self, id: &'a str) -> Result<&'a str> {
        match split_namespace(id) {
            (Some(ns), local) if ns == self.0 => {
                if local.contains(NAMESPACE_SEPARATOR) || local.is_empty() {
                    Err(Error::ProtocolError(format!(
                        "identifier '{}' is not a single-qualified provider",
                        id
                    )))
                } else {
                    Ok(local)
                }
            }
            _ => Err(Error::ProtocolError(format!(
                "identifier '{}' is not qualified with namespace '{}'",
                id, self.0
            ))),
        }
    }

    pub fn qualify_path(&self, path: &ResourcePath) -> Result<ResourcePath> {
        Ok(path.with_provider(self.qualify(&path.provider)?))
    }

    pub fn strip_path(&self, path: &ResourcePath) -> Result<ResourcePath> {
        Ok(path.with_provider(self.strip(&path.provider)?))
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let path = ResourcePath::parse("/p1/admin/friendlyName/value").unwrap();
        assert_eq!(path.provider, "p1");
        assert_eq!(path.service.as_deref(), Some("admin"));
        assert_eq!(path.resource.as_deref(), Some("friendlyName"));
        assert_eq!(path.attribute.as_deref(), Some("value"));
        assert_eq!(path.to_string(), "/p1/admin/friendlyName/value");
        assert_eq!(path.element().to_string(), "/p1/admin/friendlyName");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(ResourcePath::parse("").is_err());
        assert!(ResourcePath::parse("/").is_err());
        assert!(ResourcePath::parse("/p//r").is_err());
        assert!(ResourcePath::parse("/a/b/c/d/e").is_err());
    }

    #[test]
    fn qualify_is_applied_once() {
        let ns = Namespace::new("peerA");
        assert_eq!(ns.qualify("p1").unwrap(), "peerA:p1");
        assert_eq!(ns.qualify("peerA:p1").unwrap(), "peerA:p1");
        assert!(ns.qualify("peerB:p1").is_err());
    }

    #[test]
    fn strip_guards_double_prefix() {
        let ns = Namespace::new("peerA");
        assert_eq!(ns.strip("peerA:p1").unwrap(), "p1");
        assert!(ns.strip("peerA:peerA:p1").is_err());
        assert!(ns.strip("p1").is_err());
        assert!(ns.strip("peerB:p1").is_err());
    }

    #[test]
    fn strip_path_keeps_tail() {
        let ns = Namespace::new("peerA");
        let path = ResourcePath::resource("peerA:p1", "admin", "friendlyName");
        assert_eq!(ns.strip_path(&path).unwrap().to_string(), "/p1/admin/friendlyName");
    }
}
