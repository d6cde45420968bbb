//! Number Input Node
//!
//! Provides the number entered in the node's form.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::form_f64;
use dataflow_engine::{
    DataType, FormValues, IoValues, MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext,
    NodeExecutionResult, RegisteredNodeType, Result, ServerNode, SocketMeta, SocketMetas,
};

/// Number Input Node
///
/// # Form
/// - `value` - The number to provide
///
/// # Outputs
/// - `value` - The number, present once the form holds a valid number
pub struct NumberInputNode;

impl NumberInputNode {
    pub const TYPE: &'static str = "NumberInput";
    /// Port and form field name
    pub const PORT_VALUE: &'static str = "value";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for NumberInputNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Number Input")
            .output(Self::PORT_VALUE, DataType::Number, "Number")
            .path(&["Number"])
            .keywords(&["number", "input", "constant"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(NumberInputNode::registration));

#[async_trait]
impl ServerNode for NumberInputNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(form_f64(form, Self::PORT_VALUE).is_some())
    }

    async fn on_meta_execution(
        &self,
        form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let meta = if self.is_form_valid(form).await? {
            SocketMeta::present(serde_json::json!({}))
        } else {
            SocketMeta::absent()
        };
        Ok(SocketMetas::from([(Self::PORT_VALUE.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        _inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let value = form_f64(form, Self::PORT_VALUE).unwrap_or_default();
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            Self::PORT_VALUE.to_string(),
            serde_json::json!(value),
        )])))
    }
}
