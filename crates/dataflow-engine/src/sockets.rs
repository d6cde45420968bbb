//! Socket metadata flowing through meta-execution
//!
//! A `SocketMeta` tells downstream nodes whether a value will be present on
//! a socket and what its structure looks like (for datasets: the schema),
//! without computing the value itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Presence and structural description of a socket value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketMeta {
    pub is_present: bool,
    pub content: serde_json::Value,
}

/// Socket metas keyed by socket name
pub type SocketMetas = HashMap<String, SocketMeta>;

impl SocketMeta {
    /// A present socket with the given structural content
    pub fn present(content: serde_json::Value) -> Self {
        Self {
            is_present: true,
            content,
        }
    }

    /// An absent socket with empty content
    pub fn absent() -> Self {
        Self {
            is_present: false,
            content: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// An absent socket carrying the given (empty) content shape
    pub fn absent_with(content: serde_json::Value) -> Self {
        Self {
            is_present: false,
            content,
        }
    }
}

impl Default for SocketMeta {
    fn default() -> Self {
        Self::absent()
    }
}

/// True when every meta in the map is present
///
/// Node types use this to propagate absence: a node with a missing input
/// must not claim a present output.
pub fn all_are_defined_and_present(metas: &SocketMetas) -> bool {
    metas.values().all(|m| m.is_present)
}
