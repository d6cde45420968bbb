//! Dataflow Nodes
//!
//! Node type implementations for the dataflow engine. Every type registers
//! itself with `inventory`, so `NodeRegistry::with_builtins()` picks it up.
//!
//! # Categories
//!
//! - **Input**: Nodes providing numbers and booleans from their form
//! - **Boolean**: Boolean logic
//! - **Number**: Number formatting
//! - **Dataset**: Reading, editing, grouping and publishing record collections
//! - **Time**: Building datetime values
//! - **Output**: Nodes publishing calculation results

pub mod boolean;
pub mod dataset;
pub mod input;
pub mod number;
pub mod output;
pub mod time;

#[cfg(test)]
mod test_util;

use dataflow_engine::{NodeRegistry, RegisteredNodeType};

pub use boolean::*;
pub use dataset::*;
pub use input::*;
pub use number::*;
pub use output::*;
pub use time::*;

const NODE_TYPES: &[fn() -> RegisteredNodeType] = &[
    NumberInputNode::registration,
    BooleanInputNode::registration,
    DatasetInputNode::registration,
    XorNode::registration,
    FormatNumberNode::registration,
    NumberOutputNode::registration,
    DatasetOutputNode::registration,
    EditEntriesNode::registration,
    DistinctEntriesNode::registration,
    TimeConstructNode::registration,
];

/// Registry with every node type of this crate plus whatever other linked
/// crates submitted through `inventory`
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();
    for registration in NODE_TYPES {
        registry.insert(registration());
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = NodeRegistry::with_builtins();
        assert_eq!(registry.len(), 10, "Expected 10 built-in node types");

        assert!(registry.has_node_type("NumberInput"));
        assert!(registry.has_node_type("BooleanInput"));
        assert!(registry.has_node_type("DatasetInput"));
        assert!(registry.has_node_type("Xor"));
        assert!(registry.has_node_type("FormatNumber"));
        assert!(registry.has_node_type("NumberOutput"));
        assert!(registry.has_node_type("DatasetOutput"));
        assert!(registry.has_node_type("EditEntries"));
        assert!(registry.has_node_type("DistinctEntries"));
        assert!(registry.has_node_type("TimeConstruct"));
    }

    #[test]
    fn test_output_nodes_are_flagged() {
        let registry = builtin_registry();
        assert!(registry.is_output_node("NumberOutput"));
        assert!(registry.is_output_node("DatasetOutput"));
        assert!(!registry.is_output_node("Xor"));
        assert!(registry
            .get_node_type("EditEntries")
            .is_some_and(|t| t.has_context_fn()));
        assert!(registry
            .get_node_type("DistinctEntries")
            .is_some_and(|t| t.has_context_fn()));
    }
}
