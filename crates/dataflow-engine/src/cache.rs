//! Scoped memoization for one state or meta pass
//!
//! A `PassCache` is created at the start of an operation, passed by
//! reference through the call chain and dropped at the end. Within that
//! scope every key is computed at most once, even when several tasks ask
//! for it concurrently: late callers wait on the first computation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::sockets::SocketMetas;
use crate::types::{NodeInstance, NodeState, SocketDefs};

/// At-most-once memo table keyed by string
pub struct ScopedCache<V> {
    cells: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V: Clone> ScopedCache<V> {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, running `fetch` if it is absent.
    ///
    /// Concurrent calls for the same key share one `fetch`. A failed fetch
    /// is not cached; the next caller retries.
    pub async fn try_get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = {
            let mut cells = self.cells.lock();
            cells
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(fetch).await.cloned()
    }

    /// Cached value without fetching
    pub fn get(&self, key: &str) -> Option<V> {
        let cells = self.cells.lock();
        cells.get(key).and_then(|c| c.get().cloned())
    }

    /// Number of keys with a completed value
    pub fn len(&self) -> usize {
        let cells = self.cells.lock();
        cells.values().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ScopedCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The caches shared by one state recomputation or meta pass
#[derive(Default)]
pub struct PassCache {
    /// Nodes by id, and context boundary nodes by `con-ip-{parent}` / `con-op-{parent}`
    pub nodes: ScopedCache<NodeInstance>,
    /// Output metas by node id
    pub meta_outputs: ScopedCache<SocketMetas>,
    /// Computed lifecycle states by node id
    pub states: ScopedCache<NodeState>,
    /// Context input defs by boundary-owner id
    pub context_input_defs: ScopedCache<Option<SocketDefs>>,
    /// Context output defs by boundary-owner id
    pub context_output_defs: ScopedCache<Option<SocketDefs>>,
}

impl PassCache {
    pub fn new() -> Self {
        Self::default()
    }
}
