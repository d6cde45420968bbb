//! Core types for dataflow graphs
//!
//! These types define the structure of a graph as it is persisted by the
//! host: node instances, the connections between their sockets, and the
//! socket declarations that node types publish.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Unique identifier for a node instance
pub type NodeId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Unique identifier for a graph (the workspace that owns nodes and connections)
pub type GraphId = String;

/// Concrete values flowing through sockets during node execution
pub type IoValues = HashMap<String, serde_json::Value>;

/// A single record of a record collection, keyed by schema field name
pub type Values = serde_json::Map<String, serde_json::Value>;

/// Socket declarations keyed by socket name
pub type SocketDefs = BTreeMap<String, SocketDef>;

/// The data type carried by a socket or a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Datetime,
    /// Reference to a record collection
    Dataset,
}

/// Declaration of a single socket on a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketDef {
    pub data_type: DataType,
    pub display_name: String,
    /// Whether the socket was derived at runtime (e.g. from a dataset schema)
    #[serde(default)]
    pub is_dynamic: bool,
}

impl SocketDef {
    /// Create a static socket declaration
    pub fn new(data_type: DataType, display_name: impl Into<String>) -> Self {
        Self {
            data_type,
            display_name: display_name.into(),
            is_dynamic: false,
        }
    }

    /// Create a socket declaration derived at runtime
    pub fn dynamic(data_type: DataType, display_name: impl Into<String>) -> Self {
        Self {
            data_type,
            display_name: display_name.into(),
            is_dynamic: true,
        }
    }
}

/// Lifecycle state of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Valid,
    Invalid,
    Error,
}

/// Reserved node types marking the entry and exit of a nested context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextNodeType {
    Input,
    Output,
}

impl ContextNodeType {
    /// Node type identifier of the context entry node
    pub const INPUT_TYPE: &'static str = "ContextInputNode";
    /// Node type identifier of the context exit node
    pub const OUTPUT_TYPE: &'static str = "ContextOutputNode";

    /// The node type identifier this marker is persisted as
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => Self::INPUT_TYPE,
            Self::Output => Self::OUTPUT_TYPE,
        }
    }

    /// Parse a node type identifier into a boundary marker
    pub fn from_type(node_type: &str) -> Option<Self> {
        match node_type {
            Self::INPUT_TYPE => Some(Self::Input),
            Self::OUTPUT_TYPE => Some(Self::Output),
            _ => None,
        }
    }
}

/// Binds a socket of a node to a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescription {
    /// Socket name on the node
    pub name: String,
    pub connection_id: ConnectionId,
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: NodeId,
    /// The graph this node belongs to
    pub graph_id: GraphId,
    /// Chain of enclosing context owner ids, outermost first; empty for top-level nodes
    pub context_ids: Vec<NodeId>,
    /// Position in the editor (x, y)
    pub position: (f64, f64),
    pub inputs: Vec<ConnectionDescription>,
    pub outputs: Vec<ConnectionDescription>,
    #[serde(rename = "type")]
    pub node_type: String,
    /// Form values, each a JSON-encoded string
    pub form: HashMap<String, String>,
    pub state: NodeState,
    /// Execution completion fraction while running
    pub progress: Option<f64>,
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
}

impl NodeInstance {
    /// Create a top-level node with empty form and sockets
    pub fn new(id: impl Into<String>, graph_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            graph_id: graph_id.into(),
            context_ids: Vec::new(),
            position: (0.0, 0.0),
            inputs: Vec::new(),
            outputs: Vec::new(),
            node_type: node_type.into(),
            form: HashMap::new(),
            state: NodeState::Valid,
            progress: None,
            variables: serde_json::Map::new(),
        }
    }

    /// The boundary marker if this node is a context entry or exit node
    pub fn context_boundary(&self) -> Option<ContextNodeType> {
        ContextNodeType::from_type(&self.node_type)
    }

    /// Id of the node owning the innermost enclosing context
    pub fn parent_id(&self) -> Option<&NodeId> {
        self.context_ids.last()
    }

    /// Connection bound to the named input socket
    pub fn input_connection(&self, name: &str) -> Option<&ConnectionId> {
        self.inputs
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.connection_id)
    }
}

/// A socket reference (node id + socket name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketInstance {
    pub node_id: NodeId,
    pub name: String,
}

impl SocketInstance {
    pub fn new(node_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: name.into(),
        }
    }
}

/// A connection between an output socket and an input socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInstance {
    pub id: ConnectionId,
    pub graph_id: GraphId,
    /// Must equal the context chain of both endpoint nodes
    pub context_ids: Vec<NodeId>,
    pub from: SocketInstance,
    pub to: SocketInstance,
}

/// Schema of one field in a record collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub required: bool,
    pub unique: bool,
    #[serde(default)]
    pub fallback: String,
}

impl ValueSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
            unique: false,
            fallback: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A value produced by an output node for display outside the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutputResult {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub value: serde_json::Value,
}

/// What a node execution function returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub outputs: IoValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<NodeOutputResult>,
}

impl NodeExecutionResult {
    /// A result carrying only socket outputs
    pub fn outputs(outputs: IoValues) -> Self {
        Self {
            outputs,
            results: None,
        }
    }

    /// Attach an output result
    pub fn with_results(mut self, results: NodeOutputResult) -> Self {
        self.results = Some(results);
        self
    }
}
