//! Node type registry for dynamic node resolution
//!
//! Maps node type strings to their declaration and behavior. Node type
//! crates register themselves at link time through `inventory`:
//!
//! ```ignore
//! inventory::submit!(dataflow_engine::NodeTypeFn(XorNode::registration));
//!
//! let registry = NodeRegistry::with_builtins();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::NodeDef;
use crate::error::{EngineError, Result};
use crate::execution::NodeExecutionContext;
use crate::form::FormValues;
use crate::meta::MetaContext;
use crate::sockets::SocketMetas;
use crate::types::{IoValues, NodeExecutionResult, SocketDefs};

/// Behavior of one node type
#[async_trait]
pub trait ServerNode: Send + Sync {
    async fn is_form_valid(&self, _form: &FormValues) -> Result<bool> {
        Ok(true)
    }

    async fn is_input_valid(&self, _inputs: &IoValues) -> Result<bool> {
        Ok(true)
    }

    /// Derive output metas from input metas without computing values
    async fn on_meta_execution(
        &self,
        form: &FormValues,
        inputs: &SocketMetas,
        ctx: &MetaContext,
    ) -> Result<SocketMetas>;

    /// Compute output values from resolved input values
    async fn on_node_execution(
        &self,
        form: &FormValues,
        inputs: IoValues,
        ctx: &NodeExecutionContext,
    ) -> Result<NodeExecutionResult>;
}

/// Socket derivation for node types that own a nested context
#[async_trait]
pub trait ContextTransform: Send + Sync {
    /// Sockets the nested context receives on its entry node
    async fn transform_input_defs_to_context_input_defs(
        &self,
        input_defs: &SocketDefs,
        inputs: &SocketMetas,
        form: &FormValues,
        ctx: &MetaContext,
    ) -> Result<SocketDefs>;

    /// Sockets the nested context must produce on its exit node
    async fn transform_context_input_defs_to_context_output_defs(
        &self,
        input_defs: &SocketDefs,
        inputs: &SocketMetas,
        context_input_defs: &SocketDefs,
        context_inputs: &SocketMetas,
        form: &FormValues,
        ctx: &MetaContext,
    ) -> Result<SocketDefs>;
}

/// A node type's declaration together with its behavior
#[derive(Clone)]
pub struct RegisteredNodeType {
    pub def: NodeDef,
    pub node: Arc<dyn ServerNode>,
    /// Present iff the type owns a nested context
    pub context: Option<Arc<dyn ContextTransform>>,
}

impl RegisteredNodeType {
    /// A node type without a nested context
    pub fn new(def: NodeDef, node: Arc<dyn ServerNode>) -> Self {
        Self {
            def,
            node,
            context: None,
        }
    }

    /// A node type owning a nested context
    pub fn with_context<T>(def: NodeDef, node: Arc<T>) -> Self
    where
        T: ServerNode + ContextTransform + 'static,
    {
        Self {
            def,
            node: node.clone(),
            context: Some(node),
        }
    }

    pub fn node_type(&self) -> &str {
        &self.def.node_type
    }

    pub fn has_context_fn(&self) -> bool {
        self.context.is_some()
    }
}

/// Link-time registration of a node type.
///
/// The wrapped function builds the registration when a registry is
/// populated with `NodeRegistry::with_builtins()`.
pub struct NodeTypeFn(pub fn() -> RegisteredNodeType);

inventory::collect!(NodeTypeFn);

/// Registry of node types keyed by type identifier
#[derive(Clone, Default)]
pub struct NodeRegistry {
    entries: HashMap<String, RegisteredNodeType>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every node type submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<NodeTypeFn> {
            registry.insert((entry.0)());
        }
        log::debug!("Registered {} built-in node types", registry.len());
        registry
    }

    /// Register a node type without a nested context
    pub fn register(&mut self, def: NodeDef, node: Arc<dyn ServerNode>) {
        self.insert(RegisteredNodeType::new(def, node));
    }

    /// Register a node type owning a nested context
    pub fn register_with_context<T>(&mut self, def: NodeDef, node: Arc<T>)
    where
        T: ServerNode + ContextTransform + 'static,
    {
        self.insert(RegisteredNodeType::with_context(def, node));
    }

    /// Insert a prepared registration, replacing any previous one
    pub fn insert(&mut self, registered: RegisteredNodeType) {
        self.entries
            .insert(registered.def.node_type.clone(), registered);
    }

    pub fn get_node_type(&self, node_type: &str) -> Option<&RegisteredNodeType> {
        self.entries.get(node_type)
    }

    /// Look up a node type or fail with `UnknownNodeType`
    pub fn try_get_node_type(&self, node_type: &str) -> Result<&RegisteredNodeType> {
        self.get_node_type(node_type)
            .ok_or_else(|| EngineError::UnknownNodeType(node_type.to_string()))
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Declarations of all registered types
    pub fn all_defs(&self) -> Vec<&NodeDef> {
        self.entries.values().map(|e| &e.def).collect()
    }

    /// Whether the type is registered as an output node
    pub fn is_output_node(&self, node_type: &str) -> bool {
        self.get_node_type(node_type)
            .map(|e| e.def.is_output_node)
            .unwrap_or(false)
    }

    /// Merge another registry into this one; `other` wins on conflicts
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
