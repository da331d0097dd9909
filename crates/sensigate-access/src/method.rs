//! The access methods every element may bind.

use sensigate_core::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MethodKind {
    Read,
    Write,
    Act,
    Subscribe,
    Unsubscribe,
}

impl MethodKind {
    pub fn all() -> &'static [MethodKind] {
        &[
            MethodKind::Read,
            MethodKind::Write,
            MethodKind::Act,
            MethodKind::Subscribe,
            MethodKind::Unsubscribe,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            MethodKind::Read => "READ",
            MethodKind::Write => "WRITE",
            MethodKind::Act => "ACT",
            MethodKind::Subscribe => "SUBSCRIBE",
            MethodKind::Unsubscribe => "UNSUBSCRIBE",
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MethodKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "READ" | "GET" => Ok(MethodKind::Read),
            "WRITE" | "SET" => Ok(MethodKind::Write),
            "ACT" => Ok(MethodKind::Act),
            "SUBSCRIBE" => Ok(MethodKind::Subscribe),
            "UNSUBSCRIBE" => Ok(MethodKind::Unsubscribe),
            _ => Err(Error::not_found(format!("unknown access method: {}", s))),
        }
    }
}
