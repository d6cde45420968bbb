//! In-memory implementation of every persistence collaborator
//!
//! Used by tests and by hosts that embed the engine without a database.
//! Every trait method takes its lock, mutates and releases before returning;
//! no guard lives across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::process::{
    merge_errors, CalculationProcess, ErrorCount, ProcessState, UploadBatchDelta, UploadProcess,
};
use crate::store::{
    CreateRecordsOutcome, GraphStore, ProcessStore, RecordCollection, RecordStore, ResultStore,
};
use crate::types::{
    ConnectionInstance, ContextNodeType, NodeInstance, NodeOutputResult, NodeState, ValueSchema,
    Values,
};

/// Error kind reported for records violating a `unique` schema field
pub const DUPLICATE_KEY: &str = "DuplicateKey";

/// Thread-safe in-memory store for graphs, records, results and processes
#[derive(Default)]
pub struct InMemoryStore {
    nodes: RwLock<HashMap<String, NodeInstance>>,
    connections: RwLock<HashMap<String, ConnectionInstance>>,
    collections: RwLock<HashMap<String, RecordCollection>>,
    records: RwLock<HashMap<String, Vec<Values>>>,
    results: RwLock<Vec<(String, NodeOutputResult)>>,
    // Insertion order doubles as age; listings iterate in reverse.
    calculations: RwLock<Vec<CalculationProcess>>,
    uploads: RwLock<Vec<UploadProcess>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node
    pub fn put_node(&self, node: NodeInstance) {
        self.nodes.write().insert(node.id.clone(), node);
    }

    /// Insert or replace a connection
    pub fn put_connection(&self, connection: ConnectionInstance) {
        self.connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Results recorded for a process, in recording order
    pub fn results_for(&self, process_id: &str) -> Vec<NodeOutputResult> {
        self.results
            .read()
            .iter()
            .filter(|(id, _)| id == process_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Ids of every collection currently stored
    pub fn collection_ids(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

fn find_duplicate(
    schema: &[ValueSchema],
    existing: &[Values],
    pending: &[Values],
    record: &Values,
) -> Option<String> {
    schema.iter().filter(|s| s.unique).find_map(|field| {
        let value = record.get(&field.name)?;
        let clash = existing
            .iter()
            .chain(pending.iter())
            .any(|other| other.get(&field.name) == Some(value));
        clash.then(|| field.name.clone())
    })
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn get_all_nodes(&self, graph_id: &str) -> Result<Vec<NodeInstance>> {
        Ok(self
            .nodes
            .read()
            .values()
            .filter(|n| n.graph_id == graph_id)
            .cloned()
            .collect())
    }

    async fn get_all_connections(&self, graph_id: &str) -> Result<Vec<ConnectionInstance>> {
        Ok(self
            .connections
            .read()
            .values()
            .filter(|c| c.graph_id == graph_id)
            .cloned()
            .collect())
    }

    async fn get_node(&self, id: &str) -> Result<Option<NodeInstance>> {
        Ok(self.nodes.read().get(id).cloned())
    }

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionInstance>> {
        Ok(self.connections.read().get(id).cloned())
    }

    async fn delete_connection(&self, id: &str) -> Result<bool> {
        let Some(connection) = self.connections.write().remove(id) else {
            return Ok(false);
        };

        let mut nodes = self.nodes.write();
        if let Some(from) = nodes.get_mut(&connection.from.node_id) {
            from.outputs.retain(|c| c.connection_id != id);
        }
        if let Some(to) = nodes.get_mut(&connection.to.node_id) {
            to.inputs.retain(|c| c.connection_id != id);
        }
        Ok(true)
    }

    async fn update_node_state(&self, id: &str, state: NodeState) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("node", id))?;
        node.state = state;
        Ok(())
    }

    async fn update_node_progress(&self, id: &str, progress: Option<f64>) -> Result<()> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("node", id))?;
        node.progress = progress;
        Ok(())
    }

    async fn get_context_node(
        &self,
        parent: &NodeInstance,
        boundary: ContextNodeType,
    ) -> Result<Option<NodeInstance>> {
        let nodes = self.nodes.read();
        Ok(nodes
            .values()
            .find(|n| {
                n.node_type == boundary.as_str()
                    && n.context_ids.len() == parent.context_ids.len() + 1
                    && n.context_ids.starts_with(&parent.context_ids)
                    && n.parent_id() == Some(&parent.id)
            })
            .cloned())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_collection(&self, id: &str) -> Result<Option<RecordCollection>> {
        Ok(self.collections.read().get(id).cloned())
    }

    async fn create_collection(
        &self,
        name: &str,
        schema: Vec<ValueSchema>,
        generated_by: Option<&str>,
    ) -> Result<RecordCollection> {
        let collection = RecordCollection {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            schema,
            generated_by: generated_by.map(str::to_string),
        };
        self.records
            .write()
            .insert(collection.id.clone(), Vec::new());
        self.collections
            .write()
            .insert(collection.id.clone(), collection.clone());
        Ok(collection)
    }

    async fn get_records(&self, collection_id: &str) -> Result<Vec<Values>> {
        self.records
            .read()
            .get(collection_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("dataset", collection_id))
    }

    async fn create_records(
        &self,
        collection_id: &str,
        records: Vec<Values>,
    ) -> Result<CreateRecordsOutcome> {
        let schema = self
            .collections
            .read()
            .get(collection_id)
            .map(|c| c.schema.clone())
            .ok_or_else(|| EngineError::not_found("dataset", collection_id))?;

        let mut all = self.records.write();
        let existing = all.entry(collection_id.to_string()).or_default();

        let mut outcome = CreateRecordsOutcome::default();
        let mut accepted: Vec<Values> = Vec::with_capacity(records.len());
        for record in records {
            match find_duplicate(&schema, existing, &accepted, &record) {
                Some(field) => {
                    let entry = outcome
                        .errors
                        .entry(DUPLICATE_KEY.to_string())
                        .or_insert_with(|| ErrorCount {
                            count: 0,
                            message: format!("Duplicate value for unique field '{}'", field),
                        });
                    entry.count += 1;
                }
                None => accepted.push(record),
            }
        }
        outcome.added = accepted.len() as u64;
        existing.extend(accepted);
        Ok(outcome)
    }

    async fn create_record(&self, collection_id: &str, record: Values) -> Result<()> {
        let outcome = self.create_records(collection_id, vec![record]).await?;
        match outcome.errors.into_iter().next() {
            Some((kind, err)) => Err(EngineError::Store(format!("{}: {}", kind, err.message))),
            None => Ok(()),
        }
    }

    async fn clear_generated_collections(&self, graph_id: &str) -> Result<usize> {
        let mut collections = self.collections.write();
        let generated: Vec<String> = collections
            .values()
            .filter(|c| c.generated_by.as_deref() == Some(graph_id))
            .map(|c| c.id.clone())
            .collect();

        let mut records = self.records.write();
        for id in &generated {
            collections.remove(id);
            records.remove(id);
        }
        Ok(generated.len())
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn record_result(&self, process_id: &str, result: NodeOutputResult) -> Result<()> {
        self.results.write().push((process_id.to_string(), result));
        Ok(())
    }
}

impl InMemoryStore {
    fn with_upload<T>(&self, id: &str, f: impl FnOnce(&mut UploadProcess) -> T) -> Result<T> {
        let mut uploads = self.uploads.write();
        let upload = uploads
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| EngineError::not_found("upload", id))?;
        Ok(f(upload))
    }
}

#[async_trait]
impl ProcessStore for InMemoryStore {
    async fn insert_calculation(&self, process: CalculationProcess) -> Result<()> {
        self.calculations.write().push(process);
        Ok(())
    }

    async fn get_calculation(&self, id: &str) -> Result<Option<CalculationProcess>> {
        Ok(self
            .calculations
            .read()
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_calculations(&self, graph_id: &str) -> Result<Vec<CalculationProcess>> {
        Ok(self
            .calculations
            .read()
            .iter()
            .rev()
            .filter(|p| p.graph_id == graph_id)
            .cloned()
            .collect())
    }

    async fn finish_calculation(
        &self,
        id: &str,
        state: ProcessState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut calculations = self.calculations.write();
        let process = calculations
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| EngineError::not_found("calculation", id))?;
        if process.state.is_terminal() {
            return Ok(false);
        }
        process.state = state;
        process.finish = Some(at);
        Ok(true)
    }

    async fn insert_upload(&self, upload: UploadProcess) -> Result<()> {
        self.uploads.write().push(upload);
        Ok(())
    }

    async fn get_upload(&self, id: &str) -> Result<Option<UploadProcess>> {
        Ok(self.uploads.read().iter().find(|u| u.id == id).cloned())
    }

    async fn list_uploads(&self, collection_id: &str) -> Result<Vec<UploadProcess>> {
        Ok(self
            .uploads
            .read()
            .iter()
            .rev()
            .filter(|u| u.collection_id == collection_id)
            .cloned()
            .collect())
    }

    async fn apply_upload_batch(&self, id: &str, delta: &UploadBatchDelta) -> Result<()> {
        self.with_upload(id, |upload| {
            upload.added_entries += delta.added_entries;
            upload.failed_entries += delta.failed_entries;
            merge_errors(&mut upload.errors, &delta.errors);
        })
    }

    async fn add_invalid_entries(&self, id: &str, count: u64) -> Result<()> {
        self.with_upload(id, |upload| upload.invalid_entries += count)
    }

    async fn push_upload_file_name(&self, id: &str, file_name: &str) -> Result<()> {
        self.with_upload(id, |upload| upload.file_names.push(file_name.to_string()))
    }

    async fn finish_upload(
        &self,
        id: &str,
        state: ProcessState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_upload(id, |upload| {
            if upload.state.is_terminal() {
                return false;
            }
            upload.state = state;
            upload.finish = Some(at);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionDescription, DataType, SocketInstance};
    use serde_json::json;

    fn record(pairs: &[(&str, serde_json::Value)]) -> Values {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_unique_fields_reject_duplicates() {
        let store = InMemoryStore::new();
        let schema = vec![
            ValueSchema::new("id", DataType::Number).unique(),
            ValueSchema::new("name", DataType::String),
        ];
        let collection = store.create_collection("people", schema, None).await.unwrap();

        let outcome = store
            .create_records(
                &collection.id,
                vec![
                    record(&[("id", json!(1)), ("name", json!("a"))]),
                    record(&[("id", json!(1)), ("name", json!("b"))]),
                    record(&[("id", json!(2)), ("name", json!("c"))]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.errors[DUPLICATE_KEY].count, 1);

        // Clashes with a record committed by an earlier batch
        let again = store
            .create_records(&collection.id, vec![record(&[("id", json!(2))])])
            .await
            .unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(store.get_records(&collection.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clear_generated_collections_only_touches_graph() {
        let store = InMemoryStore::new();
        let kept = store.create_collection("kept", vec![], None).await.unwrap();
        store.create_collection("tmp", vec![], Some("g1")).await.unwrap();
        store.create_collection("other", vec![], Some("g2")).await.unwrap();

        assert_eq!(store.clear_generated_collections("g1").await.unwrap(), 1);
        assert_eq!(store.collection_ids().len(), 2);
        assert!(store.get_collection(&kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_connection_unbinds_endpoints() {
        let store = InMemoryStore::new();
        let mut a = NodeInstance::new("a", "g", "NumberInput");
        a.outputs.push(ConnectionDescription {
            name: "value".into(),
            connection_id: "c1".into(),
        });
        let mut b = NodeInstance::new("b", "g", "NumberOutput");
        b.inputs.push(ConnectionDescription {
            name: "value".into(),
            connection_id: "c1".into(),
        });
        store.put_node(a);
        store.put_node(b);
        store.put_connection(ConnectionInstance {
            id: "c1".into(),
            graph_id: "g".into(),
            context_ids: vec![],
            from: SocketInstance::new("a", "value"),
            to: SocketInstance::new("b", "value"),
        });

        assert!(store.delete_connection("c1").await.unwrap());
        assert!(!store.delete_connection("c1").await.unwrap());
        assert!(store.get_node("a").await.unwrap().unwrap().outputs.is_empty());
        assert!(store.get_node("b").await.unwrap().unwrap().inputs.is_empty());
    }

    #[tokio::test]
    async fn test_context_node_lookup_uses_chain() {
        let store = InMemoryStore::new();
        let parent = NodeInstance::new("p", "g", "EditEntries");
        let mut input = NodeInstance::new("p-in", "g", ContextNodeType::INPUT_TYPE);
        input.context_ids = vec!["p".into()];
        let mut nested = NodeInstance::new("q-in", "g", ContextNodeType::INPUT_TYPE);
        nested.context_ids = vec!["p".into(), "q".into()];
        store.put_node(parent.clone());
        store.put_node(input);
        store.put_node(nested);

        let found = store
            .get_context_node(&parent, ContextNodeType::Input)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "p-in");
        assert!(store
            .get_context_node(&parent, ContextNodeType::Output)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_finish_calculation_is_monotonic() {
        let store = InMemoryStore::new();
        let process = CalculationProcess::started("g");
        let id = process.id.clone();
        store.insert_calculation(process).await.unwrap();

        let now = Utc::now();
        assert!(store
            .finish_calculation(&id, ProcessState::Canceled, now)
            .await
            .unwrap());
        assert!(!store
            .finish_calculation(&id, ProcessState::Successful, Utc::now())
            .await
            .unwrap());

        let stored = store.get_calculation(&id).await.unwrap().unwrap();
        assert_eq!(stored.state, ProcessState::Canceled);
        assert_eq!(stored.finish, Some(now));

        let missing = store
            .finish_calculation("nope", ProcessState::Error, now)
            .await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_upload_counters_and_listing() {
        let store = InMemoryStore::new();
        let first = UploadProcess::started("c");
        let second = UploadProcess::started("c");
        let (first_id, second_id) = (first.id.clone(), second.id.clone());
        store.insert_upload(first).await.unwrap();
        store.insert_upload(second).await.unwrap();

        let mut delta = UploadBatchDelta {
            added_entries: 5,
            failed_entries: 1,
            ..Default::default()
        };
        delta.errors.insert(
            DUPLICATE_KEY.into(),
            ErrorCount {
                count: 1,
                message: "dup".into(),
            },
        );
        store.apply_upload_batch(&first_id, &delta).await.unwrap();
        store.apply_upload_batch(&first_id, &delta).await.unwrap();
        store.add_invalid_entries(&first_id, 3).await.unwrap();
        store.push_upload_file_name(&first_id, "a.csv").await.unwrap();

        let upload = store.get_upload(&first_id).await.unwrap().unwrap();
        assert_eq!(upload.added_entries, 10);
        assert_eq!(upload.failed_entries, 2);
        assert_eq!(upload.invalid_entries, 3);
        assert_eq!(upload.errors[DUPLICATE_KEY].count, 2);
        assert_eq!(upload.file_names, vec!["a.csv".to_string()]);

        let listed = store.list_uploads("c").await.unwrap();
        assert_eq!(listed[0].id, second_id);
        assert_eq!(listed[1].id, first_id);
    }
}
