//! Node-execution engine
//!
//! Resolves a node's inputs depth-first by executing its upstream nodes,
//! then runs the node type's execution function. Execution results are not
//! cached: node execution may have side effects such as record creation.
//!
//! Node types owning a nested context receive a `ContextFnExecution` which
//! runs the context once per call, injecting the given values at the
//! context's entry node and returning what arrives at its exit node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::events::{emit, EventSink, NullEventSink, ProcessEvent};
use crate::form::parse_node_form;
use crate::registry::NodeRegistry;
use crate::store::{self, GraphStore, RecordStore};
use crate::types::{ContextNodeType, IoValues, NodeExecutionResult, NodeInstance};

/// Runs a nested context once
#[async_trait]
pub trait ContextFnExecution: Send + Sync {
    /// Execute the context with `input` available at its entry node
    async fn execute(&self, input: IoValues) -> Result<IoValues>;
}

/// What a node type sees while executing
#[derive(Clone)]
pub struct NodeExecutionContext {
    pub node: NodeInstance,
    /// Present iff the node's type owns a nested context
    pub context_fn: Option<Arc<dyn ContextFnExecution>>,
    pub cancel: CancellationToken,
    pub records: Arc<dyn RecordStore>,
    graph: Arc<dyn GraphStore>,
    events: Arc<dyn EventSink>,
    progress_reported: Arc<AtomicBool>,
}

impl NodeExecutionContext {
    pub fn graph_id(&self) -> &str {
        &self.node.graph_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` once cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// The nested context runner, or `MissingContextFunction`
    pub fn try_context_fn(&self) -> Result<&Arc<dyn ContextFnExecution>> {
        self.context_fn
            .as_ref()
            .ok_or(EngineError::MissingContextFunction)
    }

    /// Persist a completion fraction on the executing node
    pub async fn report_progress(&self, fraction: f64) -> Result<()> {
        let fraction = fraction.clamp(0.0, 1.0);
        self.progress_reported.store(true, Ordering::Relaxed);
        self.graph
            .update_node_progress(&self.node.id, Some(fraction))
            .await?;
        emit(
            self.events.as_ref(),
            ProcessEvent::NodeProgress {
                node_id: self.node.id.clone(),
                progress: fraction,
            },
        );
        Ok(())
    }
}

/// Values injected at the entry node of one context activation
struct ContextScope {
    parent_id: String,
    values: IoValues,
}

/// Executes nodes against a graph store
#[derive(Clone)]
pub struct Executor {
    registry: Arc<NodeRegistry>,
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
    events: Arc<dyn EventSink>,
}

impl Executor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            registry,
            graph,
            records,
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Execute `node`, resolving its inputs depth-first
    pub async fn execute_node(
        &self,
        node: &NodeInstance,
        cancel: &CancellationToken,
    ) -> Result<NodeExecutionResult> {
        self.execute(node, None, cancel, &[]).await
    }

    fn execute<'a>(
        &'a self,
        node: &'a NodeInstance,
        scope: Option<&'a ContextScope>,
        cancel: &'a CancellationToken,
        trail: &'a [String],
    ) -> BoxFuture<'a, Result<NodeExecutionResult>> {
        async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if trail.iter().any(|id| id == &node.id) {
                return Err(EngineError::structural(format!(
                    "Cycle detected at node '{}'",
                    node.id
                )));
            }
            let mut trail = trail.to_vec();
            trail.push(node.id.clone());

            match node.context_boundary() {
                Some(ContextNodeType::Input) => match scope {
                    Some(scope) if node.parent_id() == Some(&scope.parent_id) => {
                        Ok(NodeExecutionResult::outputs(scope.values.clone()))
                    }
                    _ => Err(EngineError::structural(format!(
                        "No context values available for '{}'",
                        node.id
                    ))),
                },
                Some(ContextNodeType::Output) => {
                    let inputs = self.resolve_inputs(node, scope, cancel, &trail).await?;
                    Ok(NodeExecutionResult::outputs(inputs))
                }
                None => self.run_node_type(node, scope, cancel, &trail).await,
            }
        }
        .boxed()
    }

    async fn resolve_inputs(
        &self,
        node: &NodeInstance,
        scope: Option<&ContextScope>,
        cancel: &CancellationToken,
        trail: &[String],
    ) -> Result<IoValues> {
        let mut inputs = IoValues::with_capacity(node.inputs.len());
        for binding in &node.inputs {
            let connection =
                store::try_get_connection(self.graph.as_ref(), &binding.connection_id).await?;
            let upstream = store::try_get_node(self.graph.as_ref(), &connection.from.node_id).await?;
            let mut result = self.execute(&upstream, scope, cancel, trail).await?;
            if let Some(value) = result.outputs.remove(&connection.from.name) {
                inputs.insert(binding.name.clone(), value);
            }
        }
        Ok(inputs)
    }

    async fn run_node_type(
        &self,
        node: &NodeInstance,
        scope: Option<&ContextScope>,
        cancel: &CancellationToken,
        trail: &[String],
    ) -> Result<NodeExecutionResult> {
        let registered = self.registry.try_get_node_type(&node.node_type)?;
        let inputs = self.resolve_inputs(node, scope, cancel, trail).await?;
        let form = parse_node_form(&node.form);

        if !registered.node.is_input_valid(&inputs).await? {
            return Err(EngineError::InvalidInput);
        }
        if !registered.node.is_form_valid(&form).await? {
            return Err(EngineError::InvalidForm);
        }

        let context_fn: Option<Arc<dyn ContextFnExecution>> = if registered.has_context_fn() {
            Some(Arc::new(ContextRunner {
                executor: self.clone(),
                parent: node.clone(),
                exit: OnceCell::new(),
                cancel: cancel.clone(),
                trail: trail.to_vec(),
            }))
        } else {
            None
        };

        let ctx = NodeExecutionContext {
            node: node.clone(),
            context_fn,
            cancel: cancel.clone(),
            records: self.records.clone(),
            graph: self.graph.clone(),
            events: self.events.clone(),
            progress_reported: Arc::new(AtomicBool::new(false)),
        };

        let result = registered.node.on_node_execution(&form, inputs, &ctx).await;

        if ctx.progress_reported.load(Ordering::Relaxed) {
            if let Err(e) = self.graph.update_node_progress(&node.id, None).await {
                log::warn!("Failed to reset progress of node '{}': {}", node.id, e);
            }
        }

        result.map_err(|e| {
            if !e.is_cancelled() {
                log::error!("Node '{}' ({}) failed: {}", node.id, node.node_type, e);
                emit(
                    self.events.as_ref(),
                    ProcessEvent::NodeExecutionFailed {
                        node_id: node.id.clone(),
                        error: e.to_string(),
                    },
                );
            }
            e
        })
    }
}

/// Runs the nested context owned by `parent`
struct ContextRunner {
    executor: Executor,
    parent: NodeInstance,
    exit: OnceCell<NodeInstance>,
    cancel: CancellationToken,
    trail: Vec<String>,
}

#[async_trait]
impl ContextFnExecution for ContextRunner {
    async fn execute(&self, input: IoValues) -> Result<IoValues> {
        let exit = self
            .exit
            .get_or_try_init(|| {
                store::try_get_context_node(
                    self.executor.graph.as_ref(),
                    &self.parent,
                    ContextNodeType::Output,
                )
            })
            .await?;

        let scope = ContextScope {
            parent_id: self.parent.id.clone(),
            values: input,
        };
        let result = self
            .executor
            .execute(exit, Some(&scope), &self.cancel, &self.trail)
            .await?;
        Ok(result.outputs)
    }
}
