//! Dataflow Engine - validation, execution and ingestion for node graphs
//!
//! Users compose directed graphs of typed nodes. Before anything runs, the
//! engine propagates socket metas (presence and structural content) through
//! the graph to derive each node's state; a calculation then executes the
//! graph's output nodes against the record store, which is fed by the batched
//! CSV ingestion pipeline.
//!
//! # Architecture
//!
//! - `NodeRegistry`: catalog of node types, collected at link time via `inventory`
//! - `MetaEngine`: meta-execution with per-pass memoization (`PassCache`)
//! - `StateCalculator`: VALID / INVALID / ERROR states and connection pruning
//! - `Executor`: depth-first node execution, including nested contexts
//! - `CalculationService`: calculation processes with cooperative cancellation
//! - `UploadService`: CSV uploads committed through a size/delay `Batcher`
//!
//! Persistence is abstracted behind `GraphStore`, `RecordStore`,
//! `ResultStore` and `ProcessStore`; `InMemoryStore` implements all four.
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{GraphBuilder, InMemoryStore, NodeRegistry};
//!
//! let store = InMemoryStore::new();
//! GraphBuilder::new("g")
//!     .add_node("a", "NumberInput")
//!     .with_form("value", serde_json::json!(2))
//!     .add_node("out", "NumberOutput")
//!     .connect("a", "value", "out", "value")
//!     .build_into(&store);
//! ```

pub mod batcher;
pub mod builder;
pub mod cache;
pub mod calculation;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod execution;
pub mod form;
pub mod ingest;
pub mod memory;
pub mod meta;
pub mod process;
pub mod registry;
pub mod sockets;
pub mod state;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod test_support;

// Re-export key types
pub use builder::{context_input_id, context_output_id, BuiltGraph, GraphBuilder};
pub use cache::{PassCache, ScopedCache};
pub use calculation::{CalculationService, StartOptions};
pub use config::{CalculationConfig, EngineConfig, IngestionConfig};
pub use descriptor::{NodeDef, NodeDescriptor};
pub use error::{EngineError, Result};
pub use events::{EventSink, NullEventSink, ProcessEvent, VecEventSink};
pub use execution::{ContextFnExecution, Executor, NodeExecutionContext};
pub use form::{parse_node_form, FormValues};
pub use ingest::{UploadFile, UploadService};
pub use memory::InMemoryStore;
pub use meta::{MetaContext, MetaEngine};
pub use process::{CalculationProcess, ErrorCount, ProcessState, UploadProcess};
pub use registry::{ContextTransform, NodeRegistry, NodeTypeFn, RegisteredNodeType, ServerNode};
pub use sockets::{all_are_defined_and_present, SocketMeta, SocketMetas};
pub use state::{StateCalculator, StateUpdate};
pub use store::{GraphStore, ProcessStore, RecordCollection, RecordStore, ResultStore};
pub use types::*;
pub use validation::{validate_graph, MetaValidator, NodeValidator, ValidationError};

