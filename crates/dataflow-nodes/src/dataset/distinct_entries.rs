//! Distinct Entries Node
//!
//! Groups the entries of a dataset by the values of the form's distinct
//! fields and runs its nested context once per group. The context receives
//! the group's entries as `filteredDataset` plus one `<field>-distinct`
//! socket per distinct field. Each run produces one entry of the output
//! dataset: the distinct values followed by the added fields taken from the
//! context's exit node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dataflow_engine::store::try_get_collection;
use dataflow_engine::{
    all_are_defined_and_present, ContextTransform, DataType, EngineError, FormValues, IoValues,
    MetaContext, NodeDef, NodeDescriptor, NodeExecutionContext, NodeExecutionResult,
    RegisteredNodeType, Result, ServerNode, SocketDef, SocketDefs, SocketMetas, ValueSchema,
    Values,
};
use serde_json::Value;

use super::{absent_dataset_meta, dataset_meta, DatasetRef, PORT_DATASET};

/// Groups between two progress reports
const PROGRESS_STEP: usize = 100;

/// Context input carrying the entries of the current group
pub const PORT_FILTERED_DATASET: &str = "filteredDataset";

/// Name under which a distinct field appears in the context and the output
pub fn distinct_name(field: &str) -> String {
    format!("{}-distinct", field)
}

/// Schema list stored in the form field `name`; `None` if missing or malformed
fn form_schemas(form: &FormValues, name: &str) -> Option<Vec<ValueSchema>> {
    match form.get(name)? {
        Value::Null => None,
        value => serde_json::from_value(value.clone()).ok(),
    }
}

/// Schema of the produced dataset
fn output_schema(distinct: &[ValueSchema], added: &[ValueSchema]) -> Vec<ValueSchema> {
    distinct
        .iter()
        .map(|field| ValueSchema {
            name: distinct_name(&field.name),
            ..field.clone()
        })
        .chain(added.iter().cloned())
        .collect()
}

/// Distinct values and the entries carrying them
type Group = (Vec<Value>, Vec<Values>);

/// Entries grouped by their distinct values, in order of first appearance
fn group_entries(entries: Vec<Values>, distinct: &[ValueSchema]) -> Result<Vec<Group>> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let key: Vec<Value> = distinct
            .iter()
            .map(|field| entry.get(&field.name).cloned().unwrap_or(Value::Null))
            .collect();
        let slot = *index
            .entry(serde_json::to_string(&key)?)
            .or_insert(groups.len());
        if slot == groups.len() {
            groups.push((key, Vec::new()));
        }
        groups[slot].1.push(entry);
    }
    Ok(groups)
}

/// Distinct Entries Node
///
/// # Inputs
/// - `dataset` - The dataset to group
///
/// # Outputs
/// - `dataset` - One entry per distinct value combination
///
/// # Form
/// - `distinctSchemas` - Fields whose values define a group (at least one)
/// - `addedSchemas` - Fields the nested context computes per group
pub struct DistinctEntriesNode;

impl DistinctEntriesNode {
    pub const TYPE: &'static str = "DistinctEntries";
    pub const FORM_DISTINCT: &'static str = "distinctSchemas";
    pub const FORM_ADDED: &'static str = "addedSchemas";

    pub fn registration() -> RegisteredNodeType {
        RegisteredNodeType::with_context(Self::descriptor(), Arc::new(Self))
    }
}

impl NodeDescriptor for DistinctEntriesNode {
    fn descriptor() -> NodeDef {
        NodeDef::new(Self::TYPE, "Distinct Entries")
            .input(PORT_DATASET, DataType::Dataset, "Dataset")
            .output(PORT_DATASET, DataType::Dataset, "Dataset")
            .path(&["Dataset"])
            .keywords(&["distinct", "group", "unique", "aggregate"])
    }
}

inventory::submit!(dataflow_engine::NodeTypeFn(DistinctEntriesNode::registration));

#[async_trait]
impl ServerNode for DistinctEntriesNode {
    async fn is_form_valid(&self, form: &FormValues) -> Result<bool> {
        let distinct = form_schemas(form, Self::FORM_DISTINCT).is_some_and(|s| !s.is_empty());
        Ok(distinct && form_schemas(form, Self::FORM_ADDED).is_some())
    }

    async fn on_meta_execution(
        &self,
        form: &FormValues,
        inputs: &SocketMetas,
        _ctx: &MetaContext,
    ) -> Result<SocketMetas> {
        let dataset_present = inputs.get(PORT_DATASET).is_some_and(|m| m.is_present);
        let meta = match (
            form_schemas(form, Self::FORM_DISTINCT),
            form_schemas(form, Self::FORM_ADDED),
        ) {
            (Some(distinct), Some(added))
                if dataset_present && all_are_defined_and_present(inputs) =>
            {
                dataset_meta(&output_schema(&distinct, &added))
            }
            _ => absent_dataset_meta(),
        };
        Ok(SocketMetas::from([(PORT_DATASET.to_string(), meta)]))
    }

    async fn on_node_execution(
        &self,
        form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult> {
        let distinct = form_schemas(form, Self::FORM_DISTINCT).ok_or(EngineError::InvalidForm)?;
        let added = form_schemas(form, Self::FORM_ADDED).unwrap_or_default();

        let source = DatasetRef::from_inputs(&inputs, PORT_DATASET)?;
        let source = try_get_collection(ctx.records.as_ref(), &source.dataset_id).await?;
        let context_fn = ctx.try_context_fn()?;

        let entries = ctx.records.get_records(&source.id).await?;
        let groups = group_entries(entries, &distinct)?;
        let total = groups.len();

        let target = ctx
            .records
            .create_collection(
                &format!("{} (distinct)", source.name),
                output_schema(&distinct, &added),
                Some(ctx.graph_id()),
            )
            .await?;

        for (i, (key, members)) in groups.into_iter().enumerate() {
            ctx.check_cancelled()?;

            let filtered = ctx
                .records
                .create_collection(
                    &format!("{} (group {})", source.name, i + 1),
                    source.schema.clone(),
                    Some(ctx.graph_id()),
                )
                .await?;
            ctx.records.create_records(&filtered.id, members).await?;

            let mut context_inputs = IoValues::from([(
                PORT_FILTERED_DATASET.to_string(),
                DatasetRef::new(filtered.id).to_value(),
            )]);
            let mut entry = Values::new();
            for (field, value) in distinct.iter().zip(key) {
                context_inputs.insert(distinct_name(&field.name), value.clone());
                entry.insert(distinct_name(&field.name), value);
            }

            let outputs = context_fn.execute(context_inputs).await?;
            for field in &added {
                if let Some(value) = outputs.get(&field.name) {
                    entry.insert(field.name.clone(), value.clone());
                }
            }
            ctx.records.create_record(&target.id, entry).await?;

            if (i + 1) % PROGRESS_STEP == 0 || i + 1 == total {
                ctx.report_progress((i + 1) as f64 / total as f64).await?;
            }
        }

        log::debug!(
            "DistinctEntriesNode {}: {} distinct groups",
            ctx.node.id,
            total
        );
        Ok(NodeExecutionResult::outputs(IoValues::from([(
            PORT_DATASET.to_string(),
            DatasetRef::new(target.id).to_value(),
        )])))
    }
}

#[async_trait]
impl ContextTransform for DistinctEntriesNode {
    /// The group's entries plus one dynamic socket per distinct field
    async fn transform_input_defs_to_context_input_defs(
        &self,
        _input_defs: &SocketDefs,
        _inputs: &SocketMetas,
        form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        let Some(distinct) = form_schemas(form, Self::FORM_DISTINCT) else {
            return Ok(SocketDefs::new());
        };
        let mut defs = SocketDefs::from([(
            PORT_FILTERED_DATASET.to_string(),
            SocketDef::dynamic(DataType::Dataset, "Filtered Dataset"),
        )]);
        for field in distinct {
            let name = distinct_name(&field.name);
            defs.insert(name.clone(), SocketDef::dynamic(field.data_type, name));
        }
        Ok(defs)
    }

    /// Context inputs pass through; every added field gets a socket
    async fn transform_context_input_defs_to_context_output_defs(
        &self,
        _input_defs: &SocketDefs,
        _inputs: &SocketMetas,
        context_input_defs: &SocketDefs,
        _context_inputs: &SocketMetas,
        form: &FormValues,
        _ctx: &MetaContext,
    ) -> Result<SocketDefs> {
        let mut defs = context_input_defs.clone();
        for field in form_schemas(form, Self::FORM_ADDED).unwrap_or_default() {
            defs.insert(
                field.name.clone(),
                SocketDef::dynamic(field.data_type, field.name),
            );
        }
        Ok(defs)
    }
}
