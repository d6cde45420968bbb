//! Dataset Output Node
//!
//! Persists the records of the incoming dataset as a new, permanent
//! collection and publishes a reference to it as the calculation result.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::form_str;
use dataflow_engine::store::try_get_collection;
use dataflow_engine::{
    DataType, FormValues, IoValues, MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext,
    NodeExecutionResult, NodeOutputResult, RegisteredNodeType, Result, ServerNode, SocketMetas,
};

use super::{DatasetRef, PORT_DATASET};
use crate::output::result_name;

/// Dataset Output Node
///
/// # Inputs
/// - `dataset` - The dataset to persist
///
/// # Form
/// - `name` - Name of the created collection and of the result, required
/// - `description` (optional)
pub struct DatasetOutputNode;

impl DatasetOutputNode {
    pub const TYPE: &'static str = "DatasetOutput";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for DatasetOutputNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Dataset Output")
            .input(PORT_DATASET, DataType::Dataset, "Dataset")
            .output_node()
            .path(&["Dataset"])
            .keywords(&["dataset", "output", "save"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(DatasetOutputNode::registration));

#[async_trait]
impl ServerNode for DatasetOutputNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(result_name(form).is_some())
    }

    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(SocketMetas::new())
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let source = DatasetRef::from_inputs(&inputs, PORT_DATASET)?;
        let source = try_get_collection(ctx.records.as_ref(), &source.dataset_id).await?;
        let name = result_name(form).unwrap_or(&source.name).to_string();
        let description = form_str(form, "description").unwrap_or_default().to_string();

        let entries = ctx.records.get_records(&source.id).await?;
        ctx.check_cancelled()?;

        let created = ctx
            .records
            .create_collection(&name, source.schema.clone(), None)
            .await?;
        let outcome = ctx.records.create_records(&created.id, entries).await?;
        log::info!(
            "DatasetOutputNode {}: saved {} entries to '{}' ({} rejected)",
            ctx.node.id,
            outcome.added,
            name,
            outcome.failed()
        );

        Ok(NodeExecutionResult::default().with_results(NodeOutputResult {
            name: name.clone(),
            description,
            data_type: DataType::Dataset,
            value: serde_json::json!({ "id": created.id, "name": name }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use crate::DatasetInputNode;
    use dataflow_engine::{GraphBuilder, InMemoryStore, RecordStore, ValueSchema, Values};
    use serde_json::json;

    fn entry(name: &str, age: f64) -> Values {
        let mut values = Values::new();
        values.insert("name".to_string(), json!(name));
        values.insert("age".to_string(), json!(age));
        values
    }

    #[tokio::test]
    async fn test_saves_entries_to_new_collection() {
        let store = Arc::new(InMemoryStore::new());
        let schema = vec![
            ValueSchema::new("name", DataType::String),
            ValueSchema::new("age", DataType::Number),
        ];
        let source = store.create_collection("People", schema.clone(), None).await.unwrap();
        store
            .create_records(&source.id, vec![entry("Ann", 30.0), entry("Bob", 41.0)])
            .await
            .unwrap();

        GraphBuilder::new("g")
            .add_node("ds", DatasetInputNode::TYPE)
            .with_form("dataset", json!(source.id))
            .add_node("out", DatasetOutputNode::TYPE)
            .with_form("name", json!("Test"))
            .with_form("description", json!("Desc"))
            .connect("ds", "dataset", "out", "dataset")
            .build_into(&store);

        let result = test_util::execute(&store, "out").await.unwrap();
        let published = result.results.unwrap();
        assert_eq!(published.name, "Test");
        assert_eq!(published.description, "Desc");
        assert_eq!(published.data_type, DataType::Dataset);
        assert_eq!(published.value["name"], json!("Test"));

        let created_id = published.value["id"].as_str().unwrap();
        let created = store.get_collection(created_id).await.unwrap().unwrap();
        assert_eq!(created.schema, schema);
        assert!(created.generated_by.is_none());
        assert_eq!(store.get_records(created_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_has_no_outputs() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = test_util::meta_context(&store, DatasetOutputNode::TYPE);
        let metas = DatasetOutputNode
            .on_meta_execution(&FormValues::new(), &SocketMetas::new(), &ctx)
            .await
            .unwrap();
        assert!(metas.is_empty());
    }
}
