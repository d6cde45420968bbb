//! Meta-execution engine
//!
//! Propagates socket metas (presence + structural content) through a graph
//! without computing values. Context entry nodes receive their sockets from
//! the owning node's `ContextTransform`, context exit nodes pass their inputs
//! through.
//!
//! Every lookup takes a `PassCache`; within one pass each node's output
//! metas and each context's socket declarations are computed at most once.
//! A key trail guards against cycles: re-entering a key already being
//! computed on the current path is a structural error instead of a wait on
//! the cache cell.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};

use crate::cache::PassCache;
use crate::error::{EngineError, Result};
use crate::form::parse_node_form;
use crate::registry::NodeRegistry;
use crate::sockets::{all_are_defined_and_present, SocketMeta, SocketMetas};
use crate::store::{self, GraphStore, RecordStore};
use crate::types::{ContextNodeType, NodeInstance, SocketDefs};

/// What a node type sees while deriving metas or socket declarations
#[derive(Clone)]
pub struct MetaContext {
    pub node: NodeInstance,
    pub records: Arc<dyn RecordStore>,
}

type Trail = [String];

fn enter(trail: &Trail, key: &str) -> Result<Vec<String>> {
    if trail.iter().any(|k| k == key) {
        return Err(EngineError::structural(format!(
            "Cycle detected while resolving '{}'",
            key
        )));
    }
    let mut next = trail.to_vec();
    next.push(key.to_string());
    Ok(next)
}

/// Drives node types' meta functions across a graph
#[derive(Clone)]
pub struct MetaEngine {
    registry: Arc<NodeRegistry>,
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
}

impl MetaEngine {
    pub fn new(
        registry: Arc<NodeRegistry>,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            registry,
            graph,
            records,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    fn context_for(&self, node: &NodeInstance) -> MetaContext {
        MetaContext {
            node: node.clone(),
            records: self.records.clone(),
        }
    }

    /// Fetch a node, memoized per pass
    pub async fn get_node(&self, id: &str, cache: &PassCache) -> Result<NodeInstance> {
        cache
            .nodes
            .try_get_or_fetch(id, || store::try_get_node(self.graph.as_ref(), id))
            .await
    }

    /// The node owning the innermost context `node` lives in
    pub async fn try_get_parent_node(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
    ) -> Result<NodeInstance> {
        let parent_id = node
            .parent_id()
            .ok_or_else(|| EngineError::structural("Parent node missing"))?;
        cache
            .nodes
            .try_get_or_fetch(parent_id, || async {
                self.graph
                    .get_node(parent_id)
                    .await?
                    .ok_or_else(|| EngineError::structural("Parent node missing"))
            })
            .await
    }

    /// Entry or exit node of the context owned by `parent`, memoized per pass
    pub async fn get_context_node(
        &self,
        parent: &NodeInstance,
        boundary: ContextNodeType,
        cache: &PassCache,
    ) -> Result<NodeInstance> {
        let key = match boundary {
            ContextNodeType::Input => format!("con-ip-{}", parent.id),
            ContextNodeType::Output => format!("con-op-{}", parent.id),
        };
        cache
            .nodes
            .try_get_or_fetch(&key, || {
                store::try_get_context_node(self.graph.as_ref(), parent, boundary)
            })
            .await
    }

    /// Declared input sockets of a node
    pub async fn get_input_defs(&self, node: &NodeInstance, cache: &PassCache) -> Result<SocketDefs> {
        self.input_defs(node, cache, &[]).await
    }

    /// Declared output sockets of a node
    pub async fn get_output_defs(&self, node: &NodeInstance, cache: &PassCache) -> Result<SocketDefs> {
        self.output_defs(node, cache, &[]).await
    }

    /// Sockets available on the entry node of the context `node` lives in.
    ///
    /// `None` for top-level nodes and for parents without a nested context.
    pub async fn get_context_input_defs(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
    ) -> Result<Option<SocketDefs>> {
        self.context_input_defs(node, cache, &[]).await
    }

    /// Sockets required on the exit node of the context `node` lives in
    pub async fn get_context_output_defs(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
    ) -> Result<Option<SocketDefs>> {
        self.context_output_defs(node, cache, &[]).await
    }

    /// Metas arriving at each declared input of `node`
    pub async fn get_meta_inputs(&self, node: &NodeInstance, cache: &PassCache) -> Result<SocketMetas> {
        self.meta_inputs(node, cache, &[]).await
    }

    /// Metas produced on each output of `node`
    pub async fn get_meta_outputs(&self, node: &NodeInstance, cache: &PassCache) -> Result<SocketMetas> {
        self.meta_outputs(node, cache, &[]).await
    }

    async fn input_defs(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
        trail: &Trail,
    ) -> Result<SocketDefs> {
        match node.context_boundary() {
            Some(ContextNodeType::Input) => Ok(self
                .context_input_defs(node, cache, trail)
                .await?
                .unwrap_or_default()),
            Some(ContextNodeType::Output) => Ok(self
                .context_output_defs(node, cache, trail)
                .await?
                .unwrap_or_default()),
            None => Ok(self
                .registry
                .try_get_node_type(&node.node_type)?
                .def
                .inputs
                .clone()),
        }
    }

    async fn output_defs(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
        trail: &Trail,
    ) -> Result<SocketDefs> {
        match node.context_boundary() {
            Some(ContextNodeType::Input) => Ok(self
                .context_input_defs(node, cache, trail)
                .await?
                .unwrap_or_default()),
            Some(ContextNodeType::Output) => Ok(self
                .context_output_defs(node, cache, trail)
                .await?
                .unwrap_or_default()),
            None => Ok(self
                .registry
                .try_get_node_type(&node.node_type)?
                .def
                .outputs
                .clone()),
        }
    }

    fn context_input_defs<'a>(
        &'a self,
        node: &'a NodeInstance,
        cache: &'a PassCache,
        trail: &'a Trail,
    ) -> BoxFuture<'a, Result<Option<SocketDefs>>> {
        async move {
            if node.parent_id().is_none() {
                return Ok(None);
            }
            let parent = self.try_get_parent_node(node, cache).await?;
            let Some(registered) = self.registry.get_node_type(&parent.node_type) else {
                return Ok(None);
            };
            let Some(transform) = registered.context.clone() else {
                return Ok(None);
            };

            let key = format!("con-in-defs-{}", parent.id);
            let trail = enter(trail, &key)?;
            cache
                .context_input_defs
                .try_get_or_fetch(&parent.id, || async {
                    let inputs = self.meta_inputs(&parent, cache, &trail).await?;
                    let form = parse_node_form(&parent.form);
                    let defs = transform
                        .transform_input_defs_to_context_input_defs(
                            &registered.def.inputs,
                            &inputs,
                            &form,
                            &self.context_for(&parent),
                        )
                        .await?;
                    Ok(Some(defs))
                })
                .await
        }
        .boxed()
    }

    fn context_output_defs<'a>(
        &'a self,
        node: &'a NodeInstance,
        cache: &'a PassCache,
        trail: &'a Trail,
    ) -> BoxFuture<'a, Result<Option<SocketDefs>>> {
        async move {
            if node.parent_id().is_none() {
                return Ok(None);
            }
            let parent = self.try_get_parent_node(node, cache).await?;
            let Some(registered) = self.registry.get_node_type(&parent.node_type) else {
                return Ok(None);
            };
            let Some(transform) = registered.context.clone() else {
                return Ok(None);
            };

            let key = format!("con-out-defs-{}", parent.id);
            let trail = enter(trail, &key)?;
            cache
                .context_output_defs
                .try_get_or_fetch(&parent.id, || async {
                    let inputs = self.meta_inputs(&parent, cache, &trail).await?;
                    let context_input_defs = self
                        .context_input_defs(node, cache, &trail)
                        .await?
                        .unwrap_or_default();
                    let entry = self
                        .get_context_node(&parent, ContextNodeType::Input, cache)
                        .await?;
                    let context_inputs = self.meta_outputs(&entry, cache, &trail).await?;
                    let form = parse_node_form(&parent.form);
                    let defs = transform
                        .transform_context_input_defs_to_context_output_defs(
                            &registered.def.inputs,
                            &inputs,
                            &context_input_defs,
                            &context_inputs,
                            &form,
                            &self.context_for(&parent),
                        )
                        .await?;
                    Ok(Some(defs))
                })
                .await
        }
        .boxed()
    }

    /// Metas on a context entry node: each socket is present iff every input
    /// of the owning node is present.
    async fn context_entry_metas(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
        trail: &Trail,
    ) -> Result<SocketMetas> {
        let defs = self
            .context_input_defs(node, cache, trail)
            .await?
            .unwrap_or_default();
        let parent = self.try_get_parent_node(node, cache).await?;
        let parent_inputs = self.meta_inputs(&parent, cache, trail).await?;
        let present = all_are_defined_and_present(&parent_inputs);

        Ok(defs
            .into_keys()
            .map(|name| {
                let meta = if present {
                    SocketMeta::present(serde_json::json!({}))
                } else {
                    SocketMeta::absent()
                };
                (name, meta)
            })
            .collect())
    }

    fn meta_inputs<'a>(
        &'a self,
        node: &'a NodeInstance,
        cache: &'a PassCache,
        trail: &'a Trail,
    ) -> BoxFuture<'a, Result<SocketMetas>> {
        async move {
            if node.context_boundary() == Some(ContextNodeType::Input) {
                return self.context_entry_metas(node, cache, trail).await;
            }

            let defs = self.input_defs(node, cache, trail).await?;
            let mut metas = SocketMetas::with_capacity(defs.len());
            for name in defs.into_keys() {
                let meta = match node.input_connection(&name) {
                    None => SocketMeta::absent(),
                    Some(connection_id) => {
                        let connection =
                            store::try_get_connection(self.graph.as_ref(), connection_id).await?;
                        let upstream = self.get_node(&connection.from.node_id, cache).await?;
                        self.meta_outputs(&upstream, cache, trail)
                            .await?
                            .remove(&connection.from.name)
                            .unwrap_or_default()
                    }
                };
                metas.insert(name, meta);
            }
            Ok(metas)
        }
        .boxed()
    }

    fn meta_outputs<'a>(
        &'a self,
        node: &'a NodeInstance,
        cache: &'a PassCache,
        trail: &'a Trail,
    ) -> BoxFuture<'a, Result<SocketMetas>> {
        async move {
            let trail = enter(trail, &node.id)?;
            cache
                .meta_outputs
                .try_get_or_fetch(&node.id, || self.compute_meta_outputs(node, cache, &trail))
                .await
        }
        .boxed()
    }

    async fn compute_meta_outputs(
        &self,
        node: &NodeInstance,
        cache: &PassCache,
        trail: &Trail,
    ) -> Result<SocketMetas> {
        match node.context_boundary() {
            Some(ContextNodeType::Input) => self.context_entry_metas(node, cache, trail).await,
            Some(ContextNodeType::Output) => self.meta_inputs(node, cache, trail).await,
            None => {
                let inputs = self.meta_inputs(node, cache, trail).await?;
                let registered = self.registry.try_get_node_type(&node.node_type)?;
                let form = parse_node_form(&node.form);
                registered
                    .node
                    .on_meta_execution(&form, &inputs, &self.context_for(node))
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{context_input_id, context_output_id, GraphBuilder};
    use crate::memory::InMemoryStore;
    use crate::test_support::engine_parts;
    use crate::types::DataType;
    use serde_json::json;

    fn meta_engine(store: &Arc<InMemoryStore>) -> MetaEngine {
        let (registry, graph, records) = engine_parts(store);
        MetaEngine::new(registry, graph, records)
    }

    #[tokio::test]
    async fn test_unconnected_inputs_are_absent() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g").add_node("sum", "Sum").build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let node = engine.get_node("sum", &cache).await.unwrap();
        let inputs = engine.get_meta_inputs(&node, &cache).await.unwrap();

        assert_eq!(inputs.len(), 2);
        assert!(!inputs["a"].is_present);
        assert!(!inputs["b"].is_present);
    }

    #[tokio::test]
    async fn test_presence_propagates_downstream() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("one", "Constant")
            .with_form("value", json!(1))
            .add_node("blank", "Constant")
            .add_node("sum", "Sum")
            .connect("one", "value", "sum", "a")
            .connect("blank", "value", "sum", "b")
            .build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let sum = engine.get_node("sum", &cache).await.unwrap();
        let inputs = engine.get_meta_inputs(&sum, &cache).await.unwrap();
        assert!(inputs["a"].is_present);
        assert!(!inputs["b"].is_present);

        let outputs = engine.get_meta_outputs(&sum, &cache).await.unwrap();
        assert!(!outputs["value"].is_present);
    }

    #[tokio::test]
    async fn test_meta_outputs_are_memoized_per_pass() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("one", "Constant")
            .with_form("value", json!(1))
            .add_node("sum", "Sum")
            .connect("one", "value", "sum", "a")
            .connect("one", "value", "sum", "b")
            .build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let sum = engine.get_node("sum", &cache).await.unwrap();
        engine.get_meta_outputs(&sum, &cache).await.unwrap();

        // "one" and "sum" each computed once
        assert_eq!(cache.meta_outputs.len(), 2);
    }

    #[tokio::test]
    async fn test_cycle_is_structural_error() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("x", "Sum")
            .add_node("y", "Sum")
            .connect("x", "value", "y", "a")
            .connect("y", "value", "x", "a")
            .build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let x = engine.get_node("x", &cache).await.unwrap();
        let err = engine.get_meta_outputs(&x, &cache).await.unwrap_err();
        assert!(matches!(err, EngineError::Structural(_)));
    }

    #[tokio::test]
    async fn test_context_defs_come_from_parent_type() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("one", "Constant")
            .with_form("value", json!(3))
            .add_node("rep", "Repeat")
            .connect("one", "value", "rep", "times")
            .enter_context("rep")
            .connect(&context_input_id("rep"), "index", &context_output_id("rep"), "value")
            .exit_context()
            .build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let entry = engine.get_node(&context_input_id("rep"), &cache).await.unwrap();
        let exit = engine.get_node(&context_output_id("rep"), &cache).await.unwrap();

        let in_defs = engine.get_context_input_defs(&entry, &cache).await.unwrap().unwrap();
        assert_eq!(in_defs["index"].data_type, DataType::Number);
        assert!(engine.get_input_defs(&entry, &cache).await.unwrap().contains_key("index"));

        let out_defs = engine.get_input_defs(&exit, &cache).await.unwrap();
        assert_eq!(out_defs["value"].data_type, DataType::Number);

        let entry_metas = engine.get_meta_outputs(&entry, &cache).await.unwrap();
        assert!(entry_metas["index"].is_present);

        let exit_inputs = engine.get_meta_inputs(&exit, &cache).await.unwrap();
        assert!(exit_inputs["value"].is_present);
    }

    #[tokio::test]
    async fn test_context_entry_absent_when_parent_input_missing() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g")
            .add_node("rep", "Repeat")
            .enter_context("rep")
            .exit_context()
            .build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let entry = engine.get_node(&context_input_id("rep"), &cache).await.unwrap();
        let metas = engine.get_meta_outputs(&entry, &cache).await.unwrap();
        assert!(!metas["index"].is_present);
    }

    #[tokio::test]
    async fn test_top_level_node_has_no_context_defs() {
        let store = Arc::new(InMemoryStore::new());
        GraphBuilder::new("g").add_node("sum", "Sum").build_into(&store);
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let sum = engine.get_node("sum", &cache).await.unwrap();
        assert!(engine.get_context_input_defs(&sum, &cache).await.unwrap().is_none());
        assert!(engine.get_context_output_defs(&sum, &cache).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_context_parent_has_no_context_defs() {
        let store = Arc::new(InMemoryStore::new());
        let mut inner = NodeInstance::new("inner", "g", "Sum");
        inner.context_ids = vec!["sum".into()];
        store.put_node(NodeInstance::new("sum", "g", "Sum"));
        store.put_node(inner.clone());
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        assert!(engine.get_context_input_defs(&inner, &cache).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_parent_node() {
        let store = Arc::new(InMemoryStore::new());
        let mut orphan = NodeInstance::new("orphan", "g", "Sum");
        orphan.context_ids = vec!["unknown id".into()];
        let engine = meta_engine(&store);
        let cache = PassCache::new();

        let err = engine
            .get_context_input_defs(&orphan, &cache)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Parent node missing");
    }
}
