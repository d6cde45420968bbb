//! Event types for streaming process progress
//!
//! Events are sent from the engine to any consumer (an API layer pushing
//! updates to clients, a test collecting them) to report calculation and
//! upload progress.

use serde::{Deserialize, Serialize};

use crate::process::ProcessState;

/// Trait for sending process events
///
/// This abstracts over the transport mechanism (mpsc, websocket, etc.)
/// so the engine does not depend on one.
pub trait EventSink: Send + Sync {
    /// Returns an error if the event could not be delivered
    fn send(&self, event: ProcessEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted by calculations and uploads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessEvent {
    #[serde(rename_all = "camelCase")]
    CalculationStarted { process_id: String, graph_id: String },

    /// A calculation reached a terminal state
    #[serde(rename_all = "camelCase")]
    CalculationFinished {
        process_id: String,
        graph_id: String,
        state: ProcessState,
    },

    #[serde(rename_all = "camelCase")]
    NodeExecutionFailed { node_id: String, error: String },

    /// Execution progress reported by a node
    #[serde(rename_all = "camelCase")]
    NodeProgress { node_id: String, progress: f64 },

    /// One batch of an upload was committed
    #[serde(rename_all = "camelCase")]
    UploadBatchCommitted {
        upload_id: String,
        added: u64,
        failed: u64,
    },

    #[serde(rename_all = "camelCase")]
    UploadFinished { upload_id: String, state: ProcessState },
}

/// Send an event, logging instead of failing when the sink rejects it
pub fn emit(sink: &dyn EventSink, event: ProcessEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Dropping process event: {}", e);
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: ProcessEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<ProcessEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: ProcessEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
