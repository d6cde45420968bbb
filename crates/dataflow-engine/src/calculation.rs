//! Calculation process orchestration
//!
//! A calculation executes every output node of a graph concurrently and
//! records their results. While it runs, a watcher polls the process record
//! and trips the cancellation token once a stop was requested. Whatever the
//! outcome, the graph's generated collections are cleared once and the
//! process record is moved to its terminal state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::config::CalculationConfig;
use crate::error::{EngineError, Result};
use crate::events::{emit, EventSink, NullEventSink, ProcessEvent};
use crate::execution::Executor;
use crate::process::{CalculationProcess, ProcessState};
use crate::registry::NodeRegistry;
use crate::store::{GraphStore, ProcessStore, RecordStore, ResultStore};
use crate::types::NodeInstance;

/// How `start_process` returns
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Wait for the calculation to finish before returning
    pub await_result: bool,
}

impl StartOptions {
    pub fn awaited() -> Self {
        Self { await_result: true }
    }
}

/// Starts, stops and lists calculation processes
#[derive(Clone)]
pub struct CalculationService {
    executor: Executor,
    graph: Arc<dyn GraphStore>,
    records: Arc<dyn RecordStore>,
    results: Arc<dyn ResultStore>,
    processes: Arc<dyn ProcessStore>,
    events: Arc<dyn EventSink>,
    config: CalculationConfig,
}

impl CalculationService {
    pub fn new(
        registry: Arc<NodeRegistry>,
        graph: Arc<dyn GraphStore>,
        records: Arc<dyn RecordStore>,
        results: Arc<dyn ResultStore>,
        processes: Arc<dyn ProcessStore>,
        config: CalculationConfig,
    ) -> Self {
        Self {
            executor: Executor::new(registry, graph.clone(), records.clone()),
            graph,
            records,
            results,
            processes,
            events: Arc::new(NullEventSink),
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = self.executor.with_events(events.clone());
        self.events = events;
        self
    }

    /// Persist a new process for `graph_id` and run it.
    ///
    /// Returns the process as it was created. With `await_result` the call
    /// only returns once the run is over; otherwise the run continues in the
    /// background.
    pub async fn start_process(
        &self,
        graph_id: &str,
        options: StartOptions,
    ) -> Result<CalculationProcess> {
        let process = CalculationProcess::started(graph_id);
        self.processes.insert_calculation(process.clone()).await?;
        log::info!("Started calculation '{}' of graph '{}'", process.id, graph_id);
        emit(
            self.events.as_ref(),
            ProcessEvent::CalculationStarted {
                process_id: process.id.clone(),
                graph_id: graph_id.to_string(),
            },
        );

        if options.await_result {
            self.run(&process).await;
        } else {
            let service = self.clone();
            let background = process.clone();
            tokio::spawn(async move { service.run(&background).await });
        }
        Ok(process)
    }

    /// Request cancellation of a running process.
    ///
    /// Already finished processes are left untouched and report success.
    pub async fn stop_calculation(&self, id: &str) -> Result<bool> {
        let process = self.try_get_process(id).await?;
        if process.state.is_terminal() {
            return Ok(true);
        }
        if self
            .processes
            .finish_calculation(id, ProcessState::Canceled, Utc::now())
            .await?
        {
            log::info!("Stop requested for calculation '{}'", id);
        }
        Ok(true)
    }

    pub async fn get_process(&self, id: &str) -> Result<Option<CalculationProcess>> {
        self.processes.get_calculation(id).await
    }

    /// Process by id or `NotFound`
    pub async fn try_get_process(&self, id: &str) -> Result<CalculationProcess> {
        self.processes
            .get_calculation(id)
            .await?
            .ok_or_else(|| EngineError::not_found("calculation", id))
    }

    /// Processes of a graph, newest first
    pub async fn list_processes(&self, graph_id: &str) -> Result<Vec<CalculationProcess>> {
        self.processes.list_calculations(graph_id).await
    }

    async fn run(&self, process: &CalculationProcess) {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_for_stop(
            self.processes.clone(),
            process.id.clone(),
            self.config.cancel_check_interval(),
            cancel.clone(),
        ));

        let outcome = self.execute_outputs(process, &cancel).await;
        watcher.abort();

        let state = if cancel.is_cancelled() {
            ProcessState::Canceled
        } else {
            match outcome {
                Ok(()) => ProcessState::Successful,
                Err(e) => {
                    log::error!("Calculation '{}' failed: {}", process.id, e);
                    ProcessState::Error
                }
            }
        };

        if let Err(e) = self
            .records
            .clear_generated_collections(&process.graph_id)
            .await
        {
            log::error!(
                "Failed to clear generated collections of graph '{}': {}",
                process.graph_id,
                e
            );
        }

        let state = match self
            .processes
            .finish_calculation(&process.id, state, Utc::now())
            .await
        {
            Ok(true) => state,
            // A stop request got there first.
            Ok(false) => ProcessState::Canceled,
            Err(e) => {
                log::error!("Failed to finish calculation '{}': {}", process.id, e);
                return;
            }
        };

        log::info!("Calculation '{}' finished as {:?}", process.id, state);
        emit(
            self.events.as_ref(),
            ProcessEvent::CalculationFinished {
                process_id: process.id.clone(),
                graph_id: process.graph_id.clone(),
                state,
            },
        );
    }

    async fn execute_outputs(
        &self,
        process: &CalculationProcess,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let registry = self.executor.registry();
        let outputs: Vec<NodeInstance> = self
            .graph
            .get_all_nodes(&process.graph_id)
            .await?
            .into_iter()
            .filter(|n| n.context_ids.is_empty() && registry.is_output_node(&n.node_type))
            .collect();
        log::debug!(
            "Executing {} output nodes for calculation '{}'",
            outputs.len(),
            process.id
        );

        try_join_all(outputs.iter().map(|node| async move {
            let result = self.executor.execute_node(node, cancel).await?;
            if let Some(output) = result.results {
                self.results.record_result(&process.id, output).await?;
            }
            Ok::<_, EngineError>(())
        }))
        .await?;
        Ok(())
    }
}

/// Poll the process record and cancel once it was stopped
async fn watch_for_stop(
    processes: Arc<dyn ProcessStore>,
    id: String,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match processes.get_calculation(&id).await {
            Ok(Some(process)) if process.state == ProcessState::Canceled => {
                log::info!("Cancelling calculation '{}'", id);
                cancel.cancel();
                return;
            }
            Ok(Some(process)) if process.state.is_terminal() => return,
            Ok(_) => {}
            Err(e) => log::warn!("Cancel check for calculation '{}' failed: {}", id, e),
        }
    }
}
