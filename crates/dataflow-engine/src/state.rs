//! State calculator
//!
//! Computes the VALID / INVALID / ERROR lifecycle state of nodes. A context
//! entry node inherits the state of the node owning its context; a context
//! owner is only valid when the exit node of its context is. Failures while
//! computing a state are logged and become `NodeState::Error` so editing keeps
//! working around a faulty node type.
//!
//! `update_states` runs after structural edits: it first removes connections
//! bound to context sockets that are no longer declared, then recomputes and
//! persists every node's state.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt};

use crate::cache::PassCache;
use crate::error::{EngineError, Result};
use crate::meta::MetaEngine;
use crate::store;
use crate::types::{ConnectionId, ConnectionInstance, ContextNodeType, NodeId, NodeInstance, NodeState};
use crate::validation::{has_cycle, MetaValidator, NodeValidator};

/// Outcome of one `update_states` pass
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// Connections removed because their context socket disappeared
    pub pruned_connections: Vec<ConnectionId>,
    /// Persisted state of every node in the graph
    pub states: HashMap<NodeId, NodeState>,
}

/// Computes and persists node states
#[derive(Clone)]
pub struct StateCalculator {
    meta: MetaEngine,
    validator: Arc<dyn NodeValidator>,
}

impl StateCalculator {
    /// Calculator validating nodes with a `MetaValidator` over `meta`
    pub fn new(meta: MetaEngine) -> Self {
        let validator = Arc::new(MetaValidator::new(meta.clone()));
        Self { meta, validator }
    }

    pub fn with_validator(mut self, validator: Arc<dyn NodeValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn meta(&self) -> &MetaEngine {
        &self.meta
    }

    /// State of `node`, memoized per node id within `cache`
    pub async fn compute_state(&self, node: &NodeInstance, cache: &PassCache) -> NodeState {
        if node.context_boundary() == Some(ContextNodeType::Input) {
            return match self.meta.try_get_parent_node(node, cache).await {
                Ok(parent) => self.memoized_state(&parent, cache).await,
                Err(e) => {
                    log::error!("Calculation error: {}", e);
                    NodeState::Error
                }
            };
        }
        self.memoized_state(node, cache).await
    }

    fn memoized_state<'a>(
        &'a self,
        node: &'a NodeInstance,
        cache: &'a PassCache,
    ) -> BoxFuture<'a, NodeState> {
        async move {
            cache
                .states
                .try_get_or_fetch(&node.id, || async {
                    Ok(match self.evaluate(node, cache).await {
                        Ok(state) => state,
                        Err(e) => {
                            log::error!("Calculation error: {}", e);
                            NodeState::Error
                        }
                    })
                })
                .await
                .unwrap_or(NodeState::Error)
        }
        .boxed()
    }

    async fn evaluate(&self, node: &NodeInstance, cache: &PassCache) -> Result<NodeState> {
        if !self.validator.is_node_in_meta_valid(node, cache).await? {
            return Ok(NodeState::Invalid);
        }
        if node.context_boundary().is_some() {
            return Ok(NodeState::Valid);
        }

        let registered = self.meta.registry().try_get_node_type(&node.node_type)?;
        if registered.has_context_fn() {
            let exit = self
                .meta
                .get_context_node(node, ContextNodeType::Output, cache)
                .await?;
            return Ok(self.memoized_state(&exit, cache).await);
        }
        Ok(NodeState::Valid)
    }

    /// Recompute and persist the state of one node
    pub async fn update_state(&self, node_id: &str) -> Result<NodeState> {
        let cache = PassCache::new();
        let node = self.meta.get_node(node_id, &cache).await?;
        let state = self.compute_state(&node, &cache).await;
        self.meta.graph().update_node_state(node_id, state).await?;
        Ok(state)
    }

    /// Remove connections whose context socket is no longer declared.
    ///
    /// A connection leaving a context entry node must use a socket of the
    /// context's input defs; one entering a context exit node must use a
    /// socket of its output defs.
    pub async fn prune_connections(
        &self,
        graph_id: &str,
        cache: &PassCache,
    ) -> Result<Vec<ConnectionId>> {
        let connections = self.meta.graph().get_all_connections(graph_id).await?;

        let endpoints = join_all(connections.iter().map(|connection| async move {
            let from = self.meta.get_node(&connection.from.node_id, cache).await?;
            let to = self.meta.get_node(&connection.to.node_id, cache).await?;
            Ok::<_, EngineError>((from, to))
        }))
        .await;

        let mut pruned = Vec::new();
        for (connection, endpoints) in connections.iter().zip(endpoints) {
            let (from, to) = endpoints?;
            if self.is_stale(connection, &from, &to, cache).await? {
                self.meta.graph().delete_connection(&connection.id).await?;
                log::debug!(
                    "Removed connection '{}' bound to an undeclared context socket",
                    connection.id
                );
                pruned.push(connection.id.clone());
            }
        }
        Ok(pruned)
    }

    async fn is_stale(
        &self,
        connection: &ConnectionInstance,
        from: &NodeInstance,
        to: &NodeInstance,
        cache: &PassCache,
    ) -> Result<bool> {
        if from.context_boundary() == Some(ContextNodeType::Input) {
            if let Some(defs) = self.meta.get_context_input_defs(from, cache).await? {
                if !defs.contains_key(&connection.from.name) {
                    return Ok(true);
                }
            }
        }
        if to.context_boundary() == Some(ContextNodeType::Output) {
            if let Some(defs) = self.meta.get_context_output_defs(to, cache).await? {
                if !defs.contains_key(&connection.to.name) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Prune stale context connections, then recompute and persist every
    /// node state of the graph.
    pub async fn update_states(&self, graph_id: &str) -> Result<StateUpdate> {
        let pruned_connections = self.prune_connections(graph_id, &PassCache::new()).await?;

        let graph = self.meta.graph();
        let nodes = graph.get_all_nodes(graph_id).await?;
        let connections = graph.get_all_connections(graph_id).await?;

        // Pruning changed bindings; states start from a fresh cache.
        let cache = PassCache::new();
        let computed = if has_cycle(&nodes, &connections) {
            // Concurrent passes over a cycle could wait on each other's cells.
            let mut computed = Vec::with_capacity(nodes.len());
            for node in &nodes {
                computed.push(self.compute_state(node, &cache).await);
            }
            computed
        } else {
            join_all(nodes.iter().map(|node| self.compute_state(node, &cache))).await
        };

        let mut states = HashMap::with_capacity(nodes.len());
        for (node, state) in nodes.iter().zip(computed) {
            graph.update_node_state(&node.id, state).await?;
            states.insert(node.id.clone(), state);
        }

        log::debug!(
            "Updated {} node states in graph '{}'",
            states.len(),
            graph_id
        );
        Ok(StateUpdate {
            pruned_connections,
            states,
        })
    }

    /// Fetch a node and compute its state in a fresh pass
    pub async fn get_state(&self, node_id: &str) -> Result<NodeState> {
        let node = store::try_get_node(self.meta.graph().as_ref(), node_id).await?;
        Ok(self.compute_state(&node, &PassCache::new()).await)
    }
}
