//! Node type descriptors
//!
//! A node type describes itself through `NodeDescriptor`: its identifier,
//! the static sockets it declares and whether it is an output node. The
//! descriptor is the single source of truth used by the registry, the
//! meta engine and the calculation orchestrator.

use serde::{Deserialize, Serialize};

use crate::types::{DataType, SocketDef, SocketDefs};

/// Trait for node types that can describe their declaration
pub trait NodeDescriptor {
    fn descriptor() -> NodeDef
    where
        Self: Sized;
}

/// Static declaration of a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    /// Unique type identifier (e.g. "Xor")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Human-readable name
    pub name: String,
    pub inputs: SocketDefs,
    pub outputs: SocketDefs,
    /// Output nodes are the roots of a calculation
    pub is_output_node: bool,
    /// Menu path for editors
    pub path: Vec<String>,
    pub keywords: Vec<String>,
}

impl NodeDef {
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: name.into(),
            inputs: SocketDefs::new(),
            outputs: SocketDefs::new(),
            is_output_node: false,
            path: Vec::new(),
            keywords: Vec::new(),
        }
    }

    /// Declare a static input socket
    pub fn input(mut self, name: &str, data_type: DataType, display_name: &str) -> Self {
        self.inputs
            .insert(name.to_string(), SocketDef::new(data_type, display_name));
        self
    }

    /// Declare a static output socket
    pub fn output(mut self, name: &str, data_type: DataType, display_name: &str) -> Self {
        self.outputs
            .insert(name.to_string(), SocketDef::new(data_type, display_name));
        self
    }

    /// Mark the type as an output node
    pub fn output_node(mut self) -> Self {
        self.is_output_node = true;
        self
    }

    pub fn path(mut self, path: &[&str]) -> Self {
        self.path = path.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_declares_sockets() {
        let def = NodeDef::new("Xor", "XOR")
            .input("a", DataType::Boolean, "A")
            .input("b", DataType::Boolean, "B")
            .output("value", DataType::Boolean, "Value")
            .path(&["Boolean"]);

        assert_eq!(def.inputs.len(), 2);
        assert_eq!(def.outputs["value"].data_type, DataType::Boolean);
        assert!(!def.outputs["value"].is_dynamic);
        assert!(!def.is_output_node);
        assert_eq!(def.path, vec!["Boolean".to_string()]);
    }

    #[test]
    fn test_serializes_type_field() {
        let def = NodeDef::new("NumberOutput", "Number Output").output_node();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "NumberOutput");
        assert_eq!(json["isOutputNode"], true);
    }
}
