//! Forbidding decorator applied to dispatch tables.

use crate::dispatch::{DispatchTable, Invocation, MethodHandler};
use crate::method::MethodKind;
use crate::policy::AccessView;
use sensigate_core::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Stands in for a method the caller may not use. Never touches the model.
struct Forbidding {
    kind: MethodKind,
    uri: String,
}

#[async_trait::async_trait]
impl MethodHandler for Forbidding {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<Value> {
        Err(Error::forbidden(self.kind, self.uri.clone()))
    }
}

/// Copy of `table` where every method `view` denies is bound to a
/// forbidding handler. Kinds the table does not bind stay unbound.
pub fn accessible(table: &DispatchTable, view: &AccessView) -> DispatchTable {
    let mut decorated = table.clone();
    for kind in table.kinds() {
        if !view.permits(kind, table.path()) {
            debug!("{} {} forbidden for {} callers", kind, table.path(), view.kind());
            decorated.bind(Forbidding {
                kind,
                uri: table.uri(),
            });
        }
    }
    decorated
}
