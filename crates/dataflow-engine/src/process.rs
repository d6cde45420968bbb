//! Calculation and upload process records
//!
//! Both kinds of process are created in `Started` and move exactly once to
//! a terminal state, at which point `finish` is set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::GraphId;

/// Lifecycle state of a calculation or upload process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Started,
    Successful,
    Error,
    Canceled,
}

impl ProcessState {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

/// One run of node execution across a graph's output nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationProcess {
    pub id: String,
    pub graph_id: GraphId,
    pub state: ProcessState,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
}

impl CalculationProcess {
    /// A freshly started process with a new id
    pub fn started(graph_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            graph_id: graph_id.into(),
            state: ProcessState::Started,
            start: Utc::now(),
            finish: None,
        }
    }
}

/// Count and sample message of one error kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCount {
    pub count: u64,
    pub message: String,
}

/// Per-kind error counters, keyed by error kind name
pub type ErrorsByKind = BTreeMap<String, ErrorCount>;

/// Merge `other` into `into`, summing counts and keeping the first message seen
pub fn merge_errors(into: &mut ErrorsByKind, other: &ErrorsByKind) {
    for (kind, err) in other {
        let entry = into.entry(kind.clone()).or_insert_with(|| ErrorCount {
            count: 0,
            message: err.message.clone(),
        });
        entry.count += err.count;
    }
}

/// One run of the batched ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProcess {
    pub id: String,
    /// Target record collection
    pub collection_id: String,
    pub state: ProcessState,
    pub added_entries: u64,
    pub failed_entries: u64,
    pub invalid_entries: u64,
    pub errors: ErrorsByKind,
    pub file_names: Vec<String>,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
}

impl UploadProcess {
    /// A freshly started upload with zeroed counters
    pub fn started(collection_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection_id: collection_id.into(),
            state: ProcessState::Started,
            added_entries: 0,
            failed_entries: 0,
            invalid_entries: 0,
            errors: ErrorsByKind::new(),
            file_names: Vec::new(),
            start: Utc::now(),
            finish: None,
        }
    }

    /// Every record that reached the pipeline, whatever its fate
    pub fn total_entries(&self) -> u64 {
        self.added_entries + self.failed_entries + self.invalid_entries
    }
}

/// Counter increments produced by one committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadBatchDelta {
    pub added_entries: u64,
    pub failed_entries: u64,
    pub errors: ErrorsByKind,
}
