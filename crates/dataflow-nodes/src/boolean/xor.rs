//! XOR Node

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::{
    all_are_defined_and_present, DataType, FormValues, IoValues, MetaContext, NodeDef,
    NodeDescriptor, NodeExecutionContext, NodeExecutionResult, RegisteredNodeType, Result,
    ServerNode, SocketMeta, SocketMetas,
};

/// Exclusive OR of two booleans
///
/// # Inputs
/// - `valueA` - First operand
/// - `valueB` - Second operand
///
/// # Outputs
/// - `value` - True iff exactly one operand is true
pub struct XorNode;

impl XorNode {
    pub const TYPE: &'static str = "Xor";
    pub const PORT_A: &'static str = "valueA";
    pub const PORT_B: &'static str = "valueB";
    pub const PORT_VALUE: &'static str = "value";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::new(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for XorNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "XOR")
            .input(Self::PORT_A, DataType::Boolean, "Value A")
            .input(Self::PORT_B, DataType::Boolean, "Value B")
            .output(Self::PORT_VALUE, DataType::Boolean, "Value")
            .path(&["Boolean"])
            .keywords(&["xor", "exclusive", "or"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(XorNode::registration));

#[async_trait]
impl ServerNode for XorNode {
    async fn is_input_valid(&self, inputs: &IoValues) -> Result<bool> {
        Ok([Self::PORT_A, Self::PORT_B]
            .iter()
            .all(|name| inputs.get(*name).is_some_and(|v| v.is_boolean())))
    }

    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let meta = if all_are_defined_and_present(inputs) {
            SocketMeta::present(serde_json::json!({}))
        } else {
            SocketMeta::absent()
        };
        Ok(SocketMetas::from([(Self::PORT_VALUE.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let a = inputs.get(Self::PORT_A).and_then(|v| v.as_bool()).unwrap_or(false);
        let b = inputs.get(Self::PORT_B).and_then(|v| v.as_bool()).unwrap_or(false);
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            Self::PORT_VALUE.to_string(),
            serde_json::Value::Bool(a != b),
        )])))
    }
}
