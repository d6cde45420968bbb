//! Fluent builder for dataflow graphs
//!
//! Keeps socket descriptors on both endpoints in sync with the connections
//! and stamps every node and connection with the context chain it is added
//! in.

use crate::memory::InMemoryStore;
use crate::types::{
    ConnectionDescription, ConnectionInstance, ContextNodeType, NodeId, NodeInstance,
    SocketInstance,
};

/// Id given to the entry node of the context owned by `parent_id`
pub fn context_input_id(parent_id: &str) -> String {
    format!("{}-ctx-in", parent_id)
}

/// Id given to the exit node of the context owned by `parent_id`
pub fn context_output_id(parent_id: &str) -> String {
    format!("{}-ctx-out", parent_id)
}

/// Nodes and connections produced by a `GraphBuilder`
#[derive(Debug, Clone, Default)]
pub struct BuiltGraph {
    pub graph_id: String,
    pub nodes: Vec<NodeInstance>,
    pub connections: Vec<ConnectionInstance>,
}

impl BuiltGraph {
    /// Insert everything into an in-memory store
    pub fn insert_into(&self, store: &InMemoryStore) {
        for node in &self.nodes {
            store.put_node(node.clone());
        }
        for connection in &self.connections {
            store.put_connection(connection.clone());
        }
    }
}

/// Fluent builder for constructing graphs
///
/// # Example
///
/// ```ignore
/// let graph = GraphBuilder::new("g")
///     .add_node("a", "NumberInput")
///     .with_form("value", json!(2))
///     .add_node("out", "NumberOutput")
///     .connect("a", "value", "out", "value")
///     .build();
/// ```
pub struct GraphBuilder {
    graph_id: String,
    nodes: Vec<NodeInstance>,
    connections: Vec<ConnectionInstance>,
    connection_counter: usize,
    scope: Vec<NodeId>,
}

impl GraphBuilder {
    pub fn new(graph_id: impl Into<String>) -> Self {
        Self {
            graph_id: graph_id.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            connection_counter: 0,
            scope: Vec::new(),
        }
    }

    /// Add a node inside the current context
    pub fn add_node(mut self, id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let mut node = NodeInstance::new(id, self.graph_id.clone(), node_type);
        node.context_ids = self.scope.clone();
        node.position = (self.nodes.len() as f64 * 100.0, 0.0);
        self.nodes.push(node);
        self
    }

    /// Set a form value on the most recently added node, JSON-encoding it
    pub fn with_form(self, name: &str, value: serde_json::Value) -> Self {
        self.with_raw_form(name, &value.to_string())
    }

    /// Set an already-encoded form value on the most recently added node
    pub fn with_raw_form(mut self, name: &str, raw: &str) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.form.insert(name.to_string(), raw.to_string());
        }
        self
    }

    /// Open the context owned by `parent_id`.
    ///
    /// Adds its entry and exit nodes; nodes added until `exit_context` live
    /// inside it.
    pub fn enter_context(mut self, parent_id: &str) -> Self {
        self.scope.push(parent_id.to_string());
        self.add_node(context_input_id(parent_id), ContextNodeType::INPUT_TYPE)
            .add_node(context_output_id(parent_id), ContextNodeType::OUTPUT_TYPE)
    }

    pub fn exit_context(mut self) -> Self {
        self.scope.pop();
        self
    }

    /// Connect two sockets in the current context with a generated id
    pub fn connect(self, from: &str, from_socket: &str, to: &str, to_socket: &str) -> Self {
        let id = format!("conn-{}", self.connection_counter + 1);
        self.connect_with_id(id, from, from_socket, to, to_socket)
    }

    /// Connect two sockets with an explicit connection id
    pub fn connect_with_id(
        mut self,
        id: impl Into<String>,
        from: &str,
        from_socket: &str,
        to: &str,
        to_socket: &str,
    ) -> Self {
        let id = id.into();
        self.connection_counter += 1;

        for node in self.nodes.iter_mut() {
            if node.id == from {
                node.outputs.push(ConnectionDescription {
                    name: from_socket.to_string(),
                    connection_id: id.clone(),
                });
            }
            if node.id == to {
                node.inputs.push(ConnectionDescription {
                    name: to_socket.to_string(),
                    connection_id: id.clone(),
                });
            }
        }

        self.connections.push(ConnectionInstance {
            id,
            graph_id: self.graph_id.clone(),
            context_ids: self.scope.clone(),
            from: SocketInstance::new(from, from_socket),
            to: SocketInstance::new(to, to_socket),
        });
        self
    }

    pub fn build(self) -> BuiltGraph {
        BuiltGraph {
            graph_id: self.graph_id,
            nodes: self.nodes,
            connections: self.connections,
        }
    }

    /// Build and insert into an in-memory store
    pub fn build_into(self, store: &InMemoryStore) -> BuiltGraph {
        let graph = self.build();
        graph.insert_into(store);
        graph
    }
}
