//! Edit Entries Node
//!
//! Owns a nested context that runs once per entry of the incoming dataset.
//! The context's entry node exposes one socket per schema field; whatever
//! arrives at the exit node replaces the field in the edited copy. The
//! edited entries land in a collection generated by the calculation, which
//! is dropped once that calculation finishes.

use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::store::try_get_collection;
use dataflow_engine::{
    all_are_defined_and_present, ContextTransform, DataType, FormValues, IoValues, MetaContext,
    NodeDef, NodeDescriptor, NodeExecutionContext, NodeExecutionResult, RegisteredNodeType,
    Result, ServerNode, SocketDef, SocketDefs, SocketMetas, Values,
};

use super::{absent_dataset_meta, schema_of, DatasetRef, PORT_DATASET};

/// Entries between two progress reports
const PROGRESS_STEP: usize = 100;

/// Edit Entries Node
///
/// # Inputs
/// - `dataset` - The dataset to edit
///
/// # Outputs
/// - `dataset` - The edited copy, with the input's schema
pub struct EditEntriesNode;

impl EditEntriesNode {
    pub const TYPE: &'static str = "EditEntries";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::with_context(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for EditEntriesNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Edit Entries")
            .input(PORT_DATASET, DataType::Dataset, "Dataset")
            .output(PORT_DATASET, DataType::Dataset, "Dataset")
            .path(&["Dataset"])
            .keywords(&["edit", "entries", "map", "transform"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(EditEntriesNode::registration));

#[async_trait]
impl ServerNode for EditEntriesNode {
    async fn on_meta_execution(
        &self,
        _form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let meta = match inputs.get(PORT_DATASET) {
            Some(meta) if meta.is_present => meta.clone(),
            _ => absent_dataset_meta(),
        };
        Ok(SocketMetas::from([(PORT_DATASET.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        _form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let source = DatasetRef::from_inputs(&inputs, PORT_DATASET)?;
        let source = try_get_collection(ctx.records.as_ref(), &source.dataset_id).await?;
        let context_fn = ctx.try_context_fn()?;

        let entries = ctx.records.get_records(&source.id).await?;
        let total = entries.len();
        let mut edited: Vec<Values> = Vec::with_capacity(total);

        for (i, mut entry) in entries.into_iter().enumerate() {
            ctx.check_cancelled()?;
            let changes = context_fn
                .execute(entry.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .await?;

            for field in &source.schema {
                if let Some(value) = changes.get(&field.name) {
                    entry.insert(field.name.clone(), value.clone());
                }
            }
            edited.push(entry);

            if (i + 1) % PROGRESS_STEP == 0 || i + 1 == total {
                ctx.report_progress((i + 1) as f64 / total as f64).await?;
            }
        }

        let target = ctx
            .records
            .create_collection(
                &format!("{} (edited)", source.name),
                source.schema.clone(),
                Some(ctx.graph_id()),
            )
            .await?;
        let outcome = ctx.records.create_records(&target.id, edited).await?;
        log::debug!(
            "EditEntriesNode {}: edited {} of {} entries",
            ctx.node.id,
            outcome.added,
            total
        );

        Ok(NodeExecutionResult::outputs(IoValues::from([(
            PORT_DATASET.to_string(),
            DatasetRef::new(target.id).to_value(),
        )])))
    }
}

#[async_trait]
impl ContextTransform for EditEntriesNode {
    /// One dynamic socket per field of the incoming schema
    async fn transform_input_defs_to_context_input_defs(
        &self,
        _input_defs: &SocketDefs,
        inputs: &SocketMetas,
        _form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        let Some(meta) = inputs.get(PORT_DATASET).filter(|m| m.is_present) else {
            return Ok(SocketDefs::new());
        };
        Ok(schema_of(meta)
            .into_iter()
            .map(|field| {
                let def = SocketDef::dynamic(field.data_type, field.name.clone());
                (field.name, def)
            })
            .collect())
    }

    async fn transform_context_input_defs_to_context_output_defs(
        &self,
        _input_defs: &SocketDefs,
        inputs: &SocketMetas,
        context_input_defs: &SocketDefs,
        _context_inputs: &SocketMetas,
        _form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        if !all_are_defined_and_present(inputs) {
            return Ok(SocketDefs::new());
        }
        Ok(context_input_defs.clone())
    }
}
