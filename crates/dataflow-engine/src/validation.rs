//! Graph validation
//!
//! Structural checks over a whole graph (dangling connections, context
//! chains, unknown types, cycles) and the per-node meta validity check the
//! state calculator relies on.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;

use crate::cache::PassCache;
use crate::error::Result;
use crate::form::parse_node_form;
use crate::meta::MetaEngine;
use crate::registry::NodeRegistry;
use crate::sockets::all_are_defined_and_present;
use crate::store::GraphStore;
use crate::types::{ConnectionInstance, ContextNodeType, NodeInstance};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Cycle detected in the graph
    CycleDetected,
    /// A node has an unknown type (not in registry)
    UnknownNodeType { node_id: String, node_type: String },
    /// A connection references a non-existent node
    UnknownNode {
        connection_id: String,
        node_id: String,
    },
    /// A connection's context chain differs from one of its endpoints
    ContextMismatch {
        connection_id: String,
        node_id: String,
    },
    /// A node lives in a context whose owner does not exist
    MissingParentNode { node_id: String },
    /// A context-owning node lacks its entry or exit node
    MissingContextNode {
        node_id: String,
        boundary: ContextNodeType,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Cycle detected in graph"),
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "Unknown node type '{}' for node '{}'", node_type, node_id)
            }
            Self::UnknownNode {
                connection_id,
                node_id,
            } => write!(
                f,
                "Connection '{}' references unknown node '{}'",
                connection_id, node_id
            ),
            Self::ContextMismatch {
                connection_id,
                node_id,
            } => write!(
                f,
                "Connection '{}' lives in a different context than node '{}'",
                connection_id, node_id
            ),
            Self::MissingParentNode { node_id } => {
                write!(f, "Parent node of '{}' is missing", node_id)
            }
            Self::MissingContextNode { node_id, boundary } => write!(
                f,
                "Node '{}' is missing its {}",
                node_id,
                boundary.as_str()
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate the structure of a persisted graph
///
/// Returns all validation errors found (not just the first).
pub async fn validate_graph(
    store: &dyn GraphStore,
    registry: &NodeRegistry,
    graph_id: &str,
) -> Result<Vec<ValidationError>> {
    let nodes = store.get_all_nodes(graph_id).await?;
    let connections = store.get_all_connections(graph_id).await?;
    let mut errors = Vec::new();

    validate_connection_references(&nodes, &connections, &mut errors);
    validate_node_types(&nodes, registry, &mut errors);
    validate_contexts(&nodes, registry, &mut errors);
    if has_cycle(&nodes, &connections) {
        errors.push(ValidationError::CycleDetected);
    }

    Ok(errors)
}

/// Check that connection endpoints exist and share the connection's context
fn validate_connection_references(
    nodes: &[NodeInstance],
    connections: &[ConnectionInstance],
    errors: &mut Vec<ValidationError>,
) {
    let by_id: HashMap<&str, &NodeInstance> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    for connection in connections {
        for endpoint in [&connection.from.node_id, &connection.to.node_id] {
            match by_id.get(endpoint.as_str()) {
                None => errors.push(ValidationError::UnknownNode {
                    connection_id: connection.id.clone(),
                    node_id: endpoint.clone(),
                }),
                Some(node) if node.context_ids != connection.context_ids => {
                    errors.push(ValidationError::ContextMismatch {
                        connection_id: connection.id.clone(),
                        node_id: endpoint.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
}

fn validate_node_types(
    nodes: &[NodeInstance],
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in nodes {
        if node.context_boundary().is_none() && !registry.has_node_type(&node.node_type) {
            errors.push(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }
}

/// Check parents of nested nodes and boundary nodes of context owners
fn validate_contexts(
    nodes: &[NodeInstance],
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    for node in nodes {
        if let Some(parent_id) = node.parent_id() {
            if !ids.contains(parent_id.as_str()) {
                errors.push(ValidationError::MissingParentNode {
                    node_id: node.id.clone(),
                });
            }
        }

        let owns_context = registry
            .get_node_type(&node.node_type)
            .map(|t| t.has_context_fn())
            .unwrap_or(false);
        if !owns_context {
            continue;
        }
        for boundary in [ContextNodeType::Input, ContextNodeType::Output] {
            let found = nodes.iter().any(|n| {
                n.context_boundary() == Some(boundary)
                    && n.parent_id() == Some(&node.id)
                    && n.context_ids.len() == node.context_ids.len() + 1
            });
            if !found {
                errors.push(ValidationError::MissingContextNode {
                    node_id: node.id.clone(),
                    boundary,
                });
            }
        }
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
pub fn has_cycle(nodes: &[NodeInstance], connections: &[ConnectionInstance]) -> bool {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        in_degree.insert(&node.id, 0);
    }
    for connection in connections {
        *in_degree.entry(&connection.to.node_id).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0;
    while let Some(node_id) = queue.pop_front() {
        visited += 1;
        for connection in connections {
            if connection.from.node_id == node_id {
                if let Some(deg) = in_degree.get_mut(connection.to.node_id.as_str()) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(&connection.to.node_id);
                    }
                }
            }
        }
    }

    visited < in_degree.len()
}

/// Structural/meta validity of a single node
#[async_trait]
pub trait NodeValidator: Send + Sync {
    /// Errors are internal failures, not invalidity
    async fn is_node_in_meta_valid(&self, node: &NodeInstance, cache: &PassCache) -> Result<bool>;
}

/// Valid when the form passes the node type's check and every declared
/// input receives a present meta
pub struct MetaValidator {
    meta: MetaEngine,
}

impl MetaValidator {
    pub fn new(meta: MetaEngine) -> Self {
        Self { meta }
    }
}

#[async_trait]
impl NodeValidator for MetaValidator {
    async fn is_node_in_meta_valid(&self, node: &NodeInstance, cache: &PassCache) -> Result<bool> {
        if node.context_boundary().is_none() {
            let registered = self.meta.registry().try_get_node_type(&node.node_type)?;
            let form = parse_node_form(&node.form);
            if !registered.node.is_form_valid(&form).await? {
                return Ok(false);
            }
        }
        let inputs = self.meta.get_meta_inputs(node, cache).await?;
        Ok(all_are_defined_and_present(&inputs))
    }
}
