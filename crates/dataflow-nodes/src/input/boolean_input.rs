//! Boolean Input Node

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::form::form_bool;
use dataflow_engine::{
    DataType, FormValues, IoValues, MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext,
    NodeExecutionResult, RegisteredNodeType, Result, ServerNode, SocketMeta, SocketMetas,
};

/// Provides the boolean entered in the node's form as `value`
pub struct BooleanInputNode;

impl BooleanInputNode {
    pub const TYPE: &'static str = "BooleanInput";
    pub const PORT_VALUE: &'static str = "value";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for BooleanInputNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Boolean Input")
            .output(Self::PORT_VALUE, DataType::Boolean, "Value")
            .path(&["Boolean"])
            .keywords(&["boolean", "input", "true", "false"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(BooleanInputNode::registration));

#[async_trait]
impl ServerNode for BooleanInputNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(form_bool(form, Self::PORT_VALUE).is_some())
    }

    async fn on_meta_execution(
        &self,
        form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let meta = match form_bool(form, Self::PORT_VALUE) {
            Some(_) => SocketMeta::present(serde_json::json!({})),
            None => SocketMeta::absent(),
        };
        Ok(SocketMetas::from([(Self::PORT_VALUE.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        _inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let value = form_bool(form, Self::PORT_VALUE).unwrap_or(false);
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            Self::PORT_VALUE.to_string(),
            serde_json::Value::Bool(value),
        )])))
    }
}
