//! Accessibility policy.
//!
//! Rules are globs over permission keys of the form `METHOD:/provider/service/resource`.
//! `*` matches within one path segment, `**` across segments, `?` one
//! character. Deny rules win over allow rules; a key no rule mentions is
//! denied.

use crate::method::MethodKind;
use regex::Regex;
use sensigate_core::{Error, IdentityKind, PolicyTier, ResourcePath, Result, SecurityConfig};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Decision::Allow => f.write_str("ALLOW"),
            Decision::Deny => f.write_str("DENY"),
        }
    }
}

pub fn permission_key(method: MethodKind, path: &ResourcePath) -> String {
    format!("{}:{}", method, path.element())
}

/// Translate a glob into an anchored regex.
pub fn glob_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                regex_str.push_str(".*");
                i += 2;
                continue;
            }
            '*' => regex_str.push_str("[^/]*"),
            '?' => regex_str.push_str("[^/]"),
            c @ ('.' | '^' | '$' | '+' | '{' | '}' | '[' | ']' | '|' | '(' | ')' | '\\') => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            c => regex_str.push(c),
        }
        i += 1;
    }
    regex_str.push('$');
    Regex::new(&regex_str).map_err(|e| Error::Config(format!("invalid access rule '{}': {}", pattern, e)))
}

pub fn glob_match(pattern: &str, value: &str) -> bool {
    glob_regex(pattern).map(|re| re.is_match(value)).unwrap_or(false)
}

/// Merge an overlay into a tier. Overlay denials are added first; deny still
/// wins over any allow the overlay brings.
pub fn merge_tier(base: &mut PolicyTier, overlay: &PolicyTier) {
    for d in &overlay.deny {
        if !base.deny.contains(d) {
            base.deny.push(d.clone());
        }
    }
    for a in &overlay.allow {
        if !base.allow.contains(a) {
            base.allow.push(a.clone());
        }
    }
}

/// A tier with its rules compiled.
#[derive(Debug, Clone)]
pub struct CompiledTier {
    tier: PolicyTier,
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl CompiledTier {
    pub fn compile(tier: &PolicyTier) -> Result<Self> {
        Ok(Self {
            tier: tier.clone(),
            allow: tier.allow.iter().map(|p| glob_regex(p)).collect::<Result<_>>()?,
            deny: tier.deny.iter().map(|p| glob_regex(p)).collect::<Result<_>>()?,
        })
    }

    pub fn tier(&self) -> &PolicyTier {
        &self.tier
    }

    pub fn check(&self, key: &str) -> Decision {
        if self.deny.iter().any(|re| re.is_match(key)) {
            return Decision::Deny;
        }
        if self.allow.iter().any(|re| re.is_match(key)) {
            return Decision::Allow;
        }
        Decision::Deny
    }
}

/// Per-identity-kind tiers of the gateway.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    anonymous: Arc<CompiledTier>,
    authenticated: Arc<CompiledTier>,
    application: Arc<CompiledTier>,
}

impl AccessPolicy {
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Ok(Self {
            anonymous: Arc::new(CompiledTier::compile(&config.anonymous)?),
            authenticated: Arc::new(CompiledTier::compile(&config.authenticated)?),
            application: Arc::new(CompiledTier::compile(&config.application)?),
        })
    }

    /// Every identity may do everything.
    pub fn permissive() -> Result<Self> {
        let all = PolicyTier {
            allow: vec!["**".into()],
            deny: Vec::new(),
        };
        Self::from_config(&SecurityConfig {
            anonymous: all.clone(),
            authenticated: all.clone(),
            application: all,
            accounts: Vec::new(),
        })
    }

    fn base(&self, kind: IdentityKind) -> &Arc<CompiledTier> {
        match kind {
            IdentityKind::Anonymous => &self.anonymous,
            IdentityKind::Authenticated => &self.authenticated,
            IdentityKind::Application => &self.application,
        }
    }

    /// The permission set of a caller without account overlay.
    pub fn base_view(&self, kind: IdentityKind) -> AccessView {
        AccessView {
            kind,
            tier: self.base(kind).clone(),
        }
    }

    /// The permission set of one caller: its kind's tier plus an optional
    /// account overlay.
    pub fn view(&self, kind: IdentityKind, overlay: Option<&PolicyTier>) -> Result<AccessView> {
        let tier = match overlay {
            Some(overlay) if !overlay.allow.is_empty() || !overlay.deny.is_empty() => {
                let mut merged = self.base(kind).tier().clone();
                merge_tier(&mut merged, overlay);
                Arc::new(CompiledTier::compile(&merged)?)
            }
            _ => return Ok(self.base_view(kind)),
        };
        Ok(AccessView { kind, tier })
    }
}

/// A session's permission set, fixed for the session's lifetime.
#[derive(Debug, Clone)]
pub struct AccessView {
    kind: IdentityKind,
    tier: Arc<CompiledTier>,
}

impl AccessView {
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn check(&self, method: MethodKind, path: &ResourcePath) -> Decision {
        self.tier.check(&permission_key(method, path))
    }

    pub fn permits(&self, method: MethodKind, path: &ResourcePath) -> bool {
        self.check(method, path) == Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(allow: &[&str], deny: &[&str]) -> PolicyTier {
        PolicyTier {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn glob_segments() {
        assert!(glob_match("READ:/*", "READ:/p1"));
        assert!(!glob_match("READ:/*", "READ:/p1/s1"));
        assert!(glob_match("READ:/**", "READ:/p1/s1/r1"));
        assert!(glob_match("*:/p1/**", "WRITE:/p1/admin/friendlyName"));
        assert!(glob_match("READ:/p?/s1", "READ:/p2/s1"));
        assert!(!glob_match("READ:/p1.s1", "READ:/p1xs1"));
    }

    #[test]
    fn deny_wins_then_allow_then_default_deny() {
        let compiled = CompiledTier::compile(&tier(&["*:/**"], &["WRITE:/p1/admin/**"])).unwrap();
        assert_eq!(compiled.check("WRITE:/p1/admin/bridge"), Decision::Deny);
        assert_eq!(compiled.check("WRITE:/p1/s1/r1"), Decision::Allow);
        let empty = CompiledTier::compile(&PolicyTier::default()).unwrap();
        assert_eq!(empty.check("READ:/p1"), Decision::Deny);
    }

    #[test]
    fn default_policy_restricts_anonymous_writes() {
        let policy = AccessPolicy::from_config(&SecurityConfig::default()).unwrap();
        let path = ResourcePath::resource("p1", "s1", "r1");
        let anonymous = policy.view(IdentityKind::Anonymous, None).unwrap();
        assert!(anonymous.permits(MethodKind::Read, &path));
        assert!(anonymous.permits(MethodKind::Subscribe, &path));
        assert!(!anonymous.permits(MethodKind::Write, &path));
        assert!(!anonymous.permits(MethodKind::Act, &path));
        let user = policy.view(IdentityKind::Authenticated, None).unwrap();
        assert!(user.permits(MethodKind::Write, &path));
    }

    #[test]
    fn overlay_denials_win() {
        let policy = AccessPolicy::from_config(&SecurityConfig::default()).unwrap();
        let overlay = tier(&[], &["ACT:/door/**"]);
        let view = policy.view(IdentityKind::Authenticated, Some(&overlay)).unwrap();
        assert!(!view.permits(MethodKind::Act, &ResourcePath::resource("door", "lock", "open")));
        assert!(view.permits(MethodKind::Act, &ResourcePath::resource("light", "sw", "on")));
    }

    #[test]
    fn attribute_paths_check_their_resource() {
        let policy = AccessPolicy::from_config(&SecurityConfig::default()).unwrap();
        let view = policy
            .view(IdentityKind::Anonymous, Some(&tier(&[], &["READ:/p1/s1/secret"])))
            .unwrap();
        assert!(!view.permits(MethodKind::Read, &ResourcePath::attribute("p1", "s1", "secret", "value")));
    }
}
