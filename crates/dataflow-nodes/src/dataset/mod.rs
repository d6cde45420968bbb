//! Dataset nodes
//!
//! Dataset sockets carry a reference to a record collection at execution
//! time and the collection's schema at meta time:
//!
//! - value: `{ "datasetId": "<collection id>" }`
//! - meta content: `{ "schema": [ValueSchema, ...] }`

mod distinct_entries;
mod edit_entries;
mod input;
mod output;

pub use distinct_entries::{distinct_name, DistinctEntriesNode, PORT_FILTERED_DATASET};
pub use edit_entries::EditEntriesNode;
pub use input::DatasetInputNode;
pub use output::DatasetOutputNode;

use dataflow_engine::{EngineError, IoValues, Result, SocketMeta, ValueSchema};
use serde::{Deserialize, Serialize};

/// Socket name shared by the dataset nodes
pub const PORT_DATASET: &str = "dataset";

/// Value travelling on a dataset socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRef {
    pub dataset_id: String,
}

impl DatasetRef {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
        }
    }

    /// Decode the reference arriving at input `name`
    pub fn from_inputs(inputs: &IoValues, name: &str) -> Result<Self> {
        let value = inputs.get(name).ok_or(EngineError::InvalidInput)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "datasetId": self.dataset_id })
    }
}

/// Present dataset meta describing `schema`
pub fn dataset_meta(schema: &[ValueSchema]) -> SocketMeta {
    SocketMeta::present(serde_json::json!({ "schema": schema }))
}

/// Absent dataset meta with an empty schema
pub fn absent_dataset_meta() -> SocketMeta {
    SocketMeta::absent_with(serde_json::json!({ "schema": [] }))
}

/// Schema carried by a dataset meta; empty when missing or malformed
pub fn schema_of(meta: &SocketMeta) -> Vec<ValueSchema> {
    meta.content
        .get("schema")
        .cloned()
        .and_then(|schema| serde_json::from_value(schema).ok())
        .unwrap_or_default()
}
