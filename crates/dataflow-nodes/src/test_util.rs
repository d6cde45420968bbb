//! Wiring shared by the node unit tests

use std::sync::Arc;

use dataflow_engine::{
    Executor, GraphStore, InMemoryStore, MetaContext, MetaEngine, NodeExecutionResult,
    NodeInstance, PassCache, RecordStore, Result, SocketMetas,
};
use tokio_util::sync::CancellationToken;

use crate::builtin_registry;

pub fn executor(store: &Arc<InMemoryStore>) -> Executor {
    Executor::new(
        Arc::new(builtin_registry()),
        store.clone() as Arc<dyn GraphStore>,
        store.clone() as Arc<dyn RecordStore>,
    )
}

pub fn meta_engine(store: &Arc<InMemoryStore>) -> MetaEngine {
    MetaEngine::new(
        Arc::new(builtin_registry()),
        store.clone() as Arc<dyn GraphStore>,
        store.clone() as Arc<dyn RecordStore>,
    )
}

/// Context for calling a node's meta hooks directly
pub fn meta_context(store: &Arc<InMemoryStore>, node_type: &str) -> MetaContext {
    MetaContext {
        node: NodeInstance::new("node", "g", node_type),
        records: store.clone() as Arc<dyn RecordStore>,
    }
}

/// Execute the stored node `id` with its upstream nodes
pub async fn execute(store: &Arc<InMemoryStore>, id: &str) -> Result<NodeExecutionResult> {
    let node = dataflow_engine::store::try_get_node(store.as_ref(), id).await?;
    executor(store)
        .execute_node(&node, &CancellationToken::new())
        .await
}

/// Meta outputs of the stored node `id` in a fresh pass
pub async fn meta_outputs(store: &Arc<InMemoryStore>, id: &str) -> Result<SocketMetas> {
    let engine = meta_engine(store);
    let cache = PassCache::new();
    let node = engine.get_node(id, &cache).await?;
    engine.get_meta_outputs(&node, &cache).await
}
