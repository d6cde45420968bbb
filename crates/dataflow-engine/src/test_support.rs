//! Node types and wiring shared by the engine's unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::descriptor::NodeDef;
use crate::error::{EngineError, Result};
use crate::execution::NodeExecutionContext;
use crate::form::{form_f64, FormValues};
use crate::memory::InMemoryStore;
use crate::meta::MetaContext;
use crate::registry::{ContextTransform, NodeRegistry, ServerNode};
use crate::sockets::{all_are_defined_and_present, SocketMeta, SocketMetas};
use crate::store::{GraphStore, RecordStore};
use crate::types::{
    DataType, IoValues, NodeExecutionResult, NodeOutputResult, SocketDef, SocketDefs,
};

fn present_if(present: bool, names: &[&str]) -> SocketMetas {
    names
        .iter()
        .map(|name| {
            let meta = if present {
                SocketMeta::present(json!({}))
            } else {
                SocketMeta::absent()
            };
            (name.to_string(), meta)
        })
        .collect()
}

fn number(inputs: &IoValues, name: &str) -> f64 {
    inputs.get(name).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

/// Outputs its numeric form value
pub struct Constant;

#[async_trait]
impl ServerNode for Constant {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        Ok(form_f64(form, "value").is_some())
    }

    async fn on_meta_execution(
        &self,
        form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(present_if(form_f64(form, "value").is_some(), &["value"]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        _inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let value = form.get("value").cloned().unwrap_or_default();
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            "value".to_string(),
            value,
        )])))
    }
}

/// Adds inputs `a` and `b`
pub struct Sum;

#[async_trait]
impl ServerNode for Sum {
    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(present_if(all_are_defined_and_present(inputs), &["value"]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let sum = number(&inputs, "a") + number(&inputs, "b");
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            "value".to_string(),
            json!(sum),
        )])))
    }
}

/// Output node publishing its input as a result
pub struct Sink;

#[async_trait]
impl ServerNode for Sink {
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
        _form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        Ok(NodeExecutionResult::default().with_results(NodeOutputResult {
            name: ctx.node.id.clone(),
            description: "Sink".to_string(),
            data_type: DataType::Number,
            value: inputs.get("value").cloned().unwrap_or_default(),
        }))
    }
}

/// Always fails to execute
pub struct Fail;

#[async_trait]
impl ServerNode for Fail {
    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(present_if(true, &["value"]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        _inputs: IoValues,
        _ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        Err(EngineError::failed("boom"))
    }
}

/// Counts its executions per graph
pub struct CountingNode;

static COUNTS: Mutex<Option<HashMap<String, usize>>> = Mutex::new(None);

impl CountingNode {
    pub const TYPE: &'static str = "Counting";

    /// Executions recorded for nodes of `graph_id`
    pub fn calls(graph_id: &str) -> usize {
        COUNTS
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|counts| counts.get(graph_id).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ServerNode for CountingNode {
    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        _inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(present_if(true, &["value"]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        _inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        *COUNTS
            .lock()
            .unwrap()
            .get_or_insert_with(HashMap::new)
            .entry(ctx.graph_id().to_string())
            .or_insert(0) += 1;
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            "value".to_string(),
            json!(1),
        )])))
    }
}

/// Runs its context `times` times, collecting each activation's `value`
pub struct Repeat;

#[async_trait]
impl ServerNode for Repeat {
    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        Ok(present_if(all_are_defined_and_present(inputs), &["values"]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let context_fn = ctx.try_context_fn()?;
        let times = number(&inputs, "times").max(0.0) as u64;

        let mut values = Vec::new();
        for i in 0..times {
            ctx.check_cancelled()?;
            let outputs = context_fn
                .execute(IoValues::from([("index".to_string(), json!(i as f64))]))
                .await?;
            values.push(outputs.get("value").cloned().unwrap_or_default());
            ctx.report_progress((i + 1) as f64 / times as f64).await?;
        }
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            "values".to_string(),
            json!(values),
        )])))
    }
}

#[async_trait]
impl ContextTransform for Repeat {
    async fn transform_input_defs_to_context_input_defs(
        &self,
        _input_defs: &SocketDefs,
        _inputs: &SocketMetas,
        _form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        Ok(SocketDefs::from([(
            "index".to_string(),
            SocketDef::dynamic(DataType::Number, "Index"),
        )]))
    }

    async fn transform_context_input_defs_to_context_output_defs(
        &self,
        _input_defs: &SocketDefs,
        _inputs: &SocketMetas,
        _context_input_defs: &SocketDefs,
        _context_inputs: &SocketMetas,
        _form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        Ok(SocketDefs::from([(
            "value".to_string(),
            SocketDef::dynamic(DataType::Number, "Value"),
        )]))
    }
}

/// Output node that works in cancellable steps of 100ms
pub struct Slow;

#[async_trait]
impl ServerNode for Slow {
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
        _form: &FormValues,
        _inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        for _ in 0..100 {
            ctx.check_cancelled()?;
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        Ok(NodeExecutionResult::default())
    }
}

/// Registry holding every test node type
pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(
        NodeDef::new("Constant", "Constant").output("value", DataType::Number, "Value"),
        Arc::new(Constant),
    );
    registry.register(
        NodeDef::new("Sum", "Sum")
            .input("a", DataType::Number, "A")
            .input("b", DataType::Number, "B")
            .output("value", DataType::Number, "Value"),
        Arc::new(Sum),
    );
    registry.register(
        NodeDef::new("Sink", "Sink")
            .input("value", DataType::Number, "Value")
            .output_node(),
        Arc::new(Sink),
    );
    registry.register(
        NodeDef::new("Fail", "Fail").output("value", DataType::Number, "Value"),
        Arc::new(Fail),
    );
    registry.register(
        NodeDef::new(CountingNode::TYPE, "Counting").output("value", DataType::Number, "Value"),
        Arc::new(CountingNode),
    );
    registry.register(NodeDef::new("Slow", "Slow").output_node(), Arc::new(Slow));
    registry.register_with_context(
        NodeDef::new("Repeat", "Repeat")
            .input("times", DataType::Number, "Times")
            .output("values", DataType::Number, "Values"),
        Arc::new(Repeat),
    );
    registry
}

/// Registry and store handles as the engine components take them
pub fn engine_parts(
    store: &Arc<InMemoryStore>,
) -> (Arc<NodeRegistry>, Arc<dyn GraphStore>, Arc<dyn RecordStore>) {
    (
        Arc::new(test_registry()),
        store.clone() as Arc<dyn GraphStore>,
        store.clone() as Arc<dyn RecordStore>,
    )
}
