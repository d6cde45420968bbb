//! Number Output Node
//!
//! Publishes the number arriving at its input as a named calculation result.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::form_str;
use dataflow_engine::{
    DataType, FormValues, IoValues, MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext,
    NodeExecutionResult, NodeOutputResult, RegisteredNodeType, Result, ServerNode, SocketMetas,
};

use super::result_name;

/// Number Output Node
///
/// # Inputs
/// - `value` - The number to publish
///
/// # Form
/// - `name` - Result name, required
/// - `description` (optional)
pub struct NumberOutputNode;

impl NumberOutputNode {
    pub const TYPE: &'static str = "NumberOutput";
    pub const PORT_VALUE: &'static str = "value";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for NumberOutputNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Number Output")
            .input(Self::PORT_VALUE, DataType::Number, "Number")
            .output_node()
            .path(&["Number"])
            .keywords(&["number", "output", "result"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(NumberOutputNode::registration));

#[async_trait]
impl ServerNode for NumberOutputNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(result_name(form).is_some())
    }

    async fn is_input_valid(&self, inputs: &IoValues) -> Result<bool> {
        Ok(inputs.get(Self::PORT_VALUE).is_some_and(|v| v.is_number()))
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
        let name = result_name(form).unwrap_or(&ctx.node.id).to_string();
        let value = inputs.get(Self::PORT_VALUE).cloned().unwrap_or_default();
        log::debug!("NumberOutputNode {}: publishing '{}'", ctx.node.id, name);

        Ok(NodeExecutionResult::default().with_results(NodeOutputResult {
            name,
            description: form_str(form, "description").unwrap_or_default().to_string(),
            data_type: DataType::Number,
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util;
    use crate::NumberInputNode;
    use dataflow_engine::{EngineError, GraphBuilder, InMemoryStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_publishes_named_result() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("n", NumberInputNode::TYPE)
            .with_form("value", json!(42))
            .add_node("out", NumberOutputNode::TYPE)
            .with_form("name", json!("Answer"))
            .with_form("description", json!("Everything"))
            .connect("n", "value", "out", "value")
            .build_into(&store);

        let result = test_util::execute(&store, "out").await.unwrap();
        assert!(result.outputs.is_empty());
        let published = result.results.unwrap();
        assert_eq!(published.name, "Answer");
        assert_eq!(published.description, "Everything");
        assert_eq!(published.data_type, DataType::Number);
        assert_eq!(published.value, json!(42.0));
    }

    #[tokio::test]
    async fn test_blank_name_is_invalid_form() {
        let form = FormValues::from([("name".to_string(), json!("  "))]);
        assert!(!NumberOutputNode.is_form_valid(&form).await.unwrap());

        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("n", NumberInputNode::TYPE)
            .with_form("value", json!(1))
            .add_node("out", NumberOutputNode::TYPE)
            .connect("n", "value", "out", "value")
            .build_into(&store);
        let err = test_util::execute(&store, "out").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidForm));
    }
}
