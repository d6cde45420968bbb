//! Dataset Input Node
//!
//! Selects an existing record collection by id and provides it downstream.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::form_str;
use dataflow_engine::store::try_get_collection;
use dataflow_engine::{
    DataType, FormValues, IoValues, MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext,
    NodeExecutionResult, RegisteredNodeType, Result, ServerNode, SocketMetas,
};

use super::{absent_dataset_meta, dataset_meta, DatasetRef, PORT_DATASET};

/// Dataset Input Node
///
/// # Form
/// - `dataset` - Id of the collection to read
///
/// # Outputs
/// - `dataset` - Reference to the collection; its meta carries the schema
pub struct DatasetInputNode;

impl DatasetInputNode {
    pub const TYPE: &'static str = "DatasetInput";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for DatasetInputNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Dataset Input")
            .output(PORT_DATASET, DataType::Dataset, "Dataset")
            .path(&["Dataset"])
            .keywords(&["dataset", "input", "records"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(DatasetInputNode::registration));

#[async_trait]
impl ServerNode for DatasetInputNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(form_str(form, PORT_DATASET).is_some())
    }

    async fn on_meta_execution(
        &self,
        form: &FormValues,
        _inputs: &SocketMetas,
        ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let collection = match form_str(form, PORT_DATASET) {
            Some(id) => ctx.records.get_collection(id).await?,
            None => None,
        };
        let meta = match collection {
            Some(collection) => dataset_meta(&collection.schema),
            None => absent_dataset_meta(),
        };
        Ok(SocketMetas::from([(PORT_DATASET.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        _inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let id = form_str(form, PORT_DATASET).unwrap_or_default();
        let collection = try_get_collection(ctx.records.as_ref(), id).await?;
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            PORT_DATASET.to_string(),
            DatasetRef::new(collection.id).to_value(),
        )])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::schema_of;
    use crate::test_util;
    use dataflow_engine::{EngineError, GraphBuilder, InMemoryStore, RecordStore, ValueSchema};
    use serde_json::json;

    #[tokio::test]
    async fn test_meta_carries_collection_schema() {
        let store = Arc::new(InMemoryStore::new());
        let schema = vec![ValueSchema::new("flag", DataType::Boolean)];
        let collection = store
            .create_collection("Flags", schema.clone(), None)
            .await
            .unwrap();
        GraphBuilder::new("g")
            .add_node("ds", DatasetInputNode::TYPE)
            .with_form("dataset", json!(collection.id))
            .build_into(&store);

        let metas = test_util::meta_outputs(&store, "ds").await.unwrap();
        assert!(metas["dataset"].is_present);
        assert_eq!(schema_of(&metas["dataset"]), schema);

        let result = test_util::execute(&store, "ds").await.unwrap();
        assert_eq!(result.outputs["dataset"], json!({ "datasetId": collection.id }));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("ds", DatasetInputNode::TYPE)
            .with_form("dataset", json!("missing"))
            .build_into(&store);

        let metas = test_util::meta_outputs(&store, "ds").await.unwrap();
        assert!(!metas["dataset"].is_present);
        assert_eq!(metas["dataset"].content, json!({ "schema": [] }));

        let err = test_util::execute(&store, "ds").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "dataset", .. }));
        assert_eq!(err.to_string(), "Unknown dataset");
    }
}
