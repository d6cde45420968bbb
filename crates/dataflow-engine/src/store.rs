//! Persistence collaborators
//!
//! The engine never owns storage. Hosts implement these traits over their
//! database; `InMemoryStore` implements all of them for tests and embedding.
//! Writes are idempotent upserts or atomic increments so that no caller
//! needs to hold a lock across a suspension point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::process::{CalculationProcess, ErrorsByKind, ProcessState, UploadBatchDelta, UploadProcess};
use crate::types::{
    ConnectionInstance, ContextNodeType, GraphId, NodeInstance, NodeOutputResult, NodeState,
    ValueSchema, Values,
};

/// Nodes and connections of graphs
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn get_all_nodes(&self, graph_id: &str) -> Result<Vec<NodeInstance>>;

    async fn get_all_connections(&self, graph_id: &str) -> Result<Vec<ConnectionInstance>>;

    async fn get_node(&self, id: &str) -> Result<Option<NodeInstance>>;

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionInstance>>;

    /// Delete a connection and unbind it from both endpoint nodes.
    ///
    /// Returns false if the connection did not exist.
    async fn delete_connection(&self, id: &str) -> Result<bool>;

    async fn update_node_state(&self, id: &str, state: NodeState) -> Result<()>;

    async fn update_node_progress(&self, id: &str, progress: Option<f64>) -> Result<()>;

    /// The entry or exit node of the context owned by `parent`
    async fn get_context_node(
        &self,
        parent: &NodeInstance,
        boundary: ContextNodeType,
    ) -> Result<Option<NodeInstance>>;
}

/// Fetch a node or fail with a not-found error
pub async fn try_get_node(store: &dyn GraphStore, id: &str) -> Result<NodeInstance> {
    store
        .get_node(id)
        .await?
        .ok_or_else(|| EngineError::not_found("node", id))
}

/// Fetch a connection or fail with a structural error
pub async fn try_get_connection(store: &dyn GraphStore, id: &str) -> Result<ConnectionInstance> {
    store
        .get_connection(id)
        .await?
        .ok_or_else(|| EngineError::structural(format!("Dangling connection '{}'", id)))
}

/// Fetch the entry or exit node of a context or fail with a structural error
pub async fn try_get_context_node(
    store: &dyn GraphStore,
    parent: &NodeInstance,
    boundary: ContextNodeType,
) -> Result<NodeInstance> {
    store.get_context_node(parent, boundary).await?.ok_or_else(|| {
        EngineError::structural(format!(
            "Missing {} for context of node '{}'",
            boundary.as_str(),
            parent.id
        ))
    })
}

/// A record collection with its schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCollection {
    pub id: String,
    pub name: String,
    pub schema: Vec<ValueSchema>,
    /// Set when the collection is a transient artifact of a graph's calculation
    pub generated_by: Option<GraphId>,
}

/// Outcome of a bulk write; per-record failures are reported, not raised
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRecordsOutcome {
    pub added: u64,
    pub errors: ErrorsByKind,
}

impl CreateRecordsOutcome {
    /// Total number of records rejected by the store
    pub fn failed(&self) -> u64 {
        self.errors.values().map(|e| e.count).sum()
    }
}

/// Record collections and their records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_collection(&self, id: &str) -> Result<Option<RecordCollection>>;

    async fn create_collection(
        &self,
        name: &str,
        schema: Vec<ValueSchema>,
        generated_by: Option<&str>,
    ) -> Result<RecordCollection>;

    async fn get_records(&self, collection_id: &str) -> Result<Vec<Values>>;

    /// Bulk write; records the store rejects are counted by error kind
    async fn create_records(
        &self,
        collection_id: &str,
        records: Vec<Values>,
    ) -> Result<CreateRecordsOutcome>;

    async fn create_record(&self, collection_id: &str, record: Values) -> Result<()>;

    /// Drop every collection generated by a calculation of `graph_id`
    async fn clear_generated_collections(&self, graph_id: &str) -> Result<usize>;
}

/// Fetch a collection or fail with a not-found error
pub async fn try_get_collection(store: &dyn RecordStore, id: &str) -> Result<RecordCollection> {
    store
        .get_collection(id)
        .await?
        .ok_or_else(|| EngineError::not_found("dataset", id))
}

/// Results produced by output nodes
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn record_result(&self, process_id: &str, result: NodeOutputResult) -> Result<()>;
}

/// Calculation and upload process records
#[async_trait]
pub trait ProcessStore: Send + Sync {
    async fn insert_calculation(&self, process: CalculationProcess) -> Result<()>;

    async fn get_calculation(&self, id: &str) -> Result<Option<CalculationProcess>>;

    /// All calculations of a graph, newest first
    async fn list_calculations(&self, graph_id: &str) -> Result<Vec<CalculationProcess>>;

    /// Move a started calculation to a terminal state.
    ///
    /// Returns false without writing if the process is already terminal.
    async fn finish_calculation(
        &self,
        id: &str,
        state: ProcessState,
        finish: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_upload(&self, upload: UploadProcess) -> Result<()>;

    async fn get_upload(&self, id: &str) -> Result<Option<UploadProcess>>;

    /// All uploads into a collection, newest first
    async fn list_uploads(&self, collection_id: &str) -> Result<Vec<UploadProcess>>;

    /// Atomically add one batch's counters to the upload
    async fn apply_upload_batch(&self, id: &str, delta: &UploadBatchDelta) -> Result<()>;

    async fn add_invalid_entries(&self, id: &str, count: u64) -> Result<()>;

    async fn push_upload_file_name(&self, id: &str, file_name: &str) -> Result<()>;

    /// Move a started upload to a terminal state; false if already terminal
    async fn finish_upload(
        &self,
        id: &str,
        state: ProcessState,
        finish: DateTime<Utc>,
    ) -> Result<bool>;
}
