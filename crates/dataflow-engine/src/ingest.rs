//! Batched CSV ingestion
//!
//! Every uploaded file is read on a blocking thread; rows are matched to the
//! collection schema by position, cleaned and validated, and valid rows are
//! committed through a `Batcher`. Invalid rows are only counted. Store-side
//! rejections (e.g. duplicate keys) are aggregated per error kind on the
//! upload record. Files of one upload are imported concurrently; the upload
//! ends SUCCESSFUL only if no file failed as a whole.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::batcher::{BatchHandler, Batcher, BatcherConfig};
use crate::config::IngestionConfig;
use crate::error::{EngineError, Result};
use crate::events::{emit, EventSink, NullEventSink, ProcessEvent};
use crate::process::{ProcessState, UploadBatchDelta, UploadProcess};
use crate::store::{try_get_collection, ProcessStore, RecordCollection, RecordStore};
use crate::types::{DataType, ValueSchema, Values};

/// One source file of an upload
pub struct UploadFile {
    pub file_name: String,
    pub reader: Box<dyn Read + Send>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            file_name: file_name.into(),
            reader: Box::new(reader),
        }
    }

    /// In-memory file contents
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(file_name, std::io::Cursor::new(bytes.into()))
    }
}

/// Coerce a raw field: booleans and numbers are parsed as JSON, anything
/// that fails to parse keeps its raw text.
///
/// Number literals beyond the `f64` range saturate to `±f64::MAX`, since
/// JSON numbers cannot hold infinities.
pub fn clean_field(raw: &str, data_type: DataType) -> Value {
    let parsed = match data_type {
        DataType::Boolean => serde_json::from_str::<Value>(raw)
            .ok()
            .map(|v| Value::Bool(is_truthy(&v))),
        DataType::Number => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| to_number(&v))
            .or_else(|| raw.trim().parse::<f64>().ok().filter(|n| !n.is_nan()))
            .map(|n| n.clamp(f64::MIN, f64::MAX))
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        DataType::String | DataType::Datetime | DataType::Dataset => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Numeric value of a parsed JSON field; `None` where the result is NaN
fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().ok()?,
        Value::Array(_) | Value::Object(_) => return None,
    };
    (!number.is_nan()).then_some(number)
}

/// Clean a row positionally against `schema`; `None` if it is invalid
///
/// Empty optional fields are kept without a type check: numbers and
/// booleans become `null`, strings stay empty.
pub fn parse_row(fields: &csv::StringRecord, schema: &[ValueSchema]) -> Option<Values> {
    if fields.len() != schema.len() {
        return None;
    }

    let mut values = Values::new();
    for (raw, field) in fields.iter().zip(schema) {
        if raw.is_empty() {
            if field.required {
                return None;
            }
            let empty = match field.data_type {
                DataType::Number | DataType::Boolean => Value::Null,
                DataType::String | DataType::Datetime | DataType::Dataset => {
                    Value::String(String::new())
                }
            };
            values.insert(field.name.clone(), empty);
            continue;
        }
        let value = clean_field(raw, field.data_type);
        let valid = match field.data_type {
            DataType::Number => value.is_number(),
            DataType::Boolean => value.is_boolean(),
            DataType::String | DataType::Datetime | DataType::Dataset => true,
        };
        if !valid {
            return None;
        }
        values.insert(field.name.clone(), value);
    }
    Some(values)
}

/// Csv errors confined to a single row
fn is_row_error(err: &csv::Error) -> bool {
    matches!(
        err.kind(),
        csv::ErrorKind::Utf8 { .. } | csv::ErrorKind::UnequalLengths { .. }
    )
}

/// Parse rows on the calling (blocking) thread; `None` marks an invalid row
fn read_rows(
    reader: Box<dyn Read + Send>,
    schema: &[ValueSchema],
    rows: mpsc::Sender<Option<Values>>,
) -> Result<()> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    for result in csv_reader.records() {
        let row = match result {
            Ok(record) => parse_row(&record, schema),
            Err(e) if is_row_error(&e) => None,
            Err(e) => return Err(e.into()),
        };
        if rows.blocking_send(row).is_err() {
            // Consumer gave up; its error is reported instead.
            break;
        }
    }
    Ok(())
}

/// Commits batches of one upload and books the outcome on its record
struct CommitBatch {
    records: Arc<dyn RecordStore>,
    processes: Arc<dyn ProcessStore>,
    events: Arc<dyn EventSink>,
    collection_id: String,
    upload_id: String,
}

#[async_trait]
impl BatchHandler<Values> for CommitBatch {
    async fn handle(&self, batch: Vec<Values>) -> Result<()> {
        let outcome = self.records.create_records(&self.collection_id, batch).await?;
        let delta = UploadBatchDelta {
            added_entries: outcome.added,
            failed_entries: outcome.failed(),
            errors: outcome.errors,
        };
        self.processes
            .apply_upload_batch(&self.upload_id, &delta)
            .await?;
        emit(
            self.events.as_ref(),
            ProcessEvent::UploadBatchCommitted {
                upload_id: self.upload_id.clone(),
                added: delta.added_entries,
                failed: delta.failed_entries,
            },
        );
        Ok(())
    }
}

/// Imports CSV files into record collections
#[derive(Clone)]
pub struct UploadService {
    records: Arc<dyn RecordStore>,
    processes: Arc<dyn ProcessStore>,
    events: Arc<dyn EventSink>,
    config: IngestionConfig,
}

impl UploadService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        processes: Arc<dyn ProcessStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            records,
            processes,
            events: Arc::new(NullEventSink),
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Import `files` into the collection and return the finished upload
    pub async fn ingest(&self, files: Vec<UploadFile>, collection_id: &str) -> Result<UploadProcess> {
        let collection = try_get_collection(self.records.as_ref(), collection_id).await?;
        let upload = UploadProcess::started(collection_id);
        self.processes.insert_upload(upload.clone()).await?;

        let imports = files.into_iter().map(|file| {
            let file_name = file.file_name.clone();
            let collection = &collection;
            let upload_id = upload.id.as_str();
            async move { (file_name, self.import_file(file, collection, upload_id).await) }
        });

        let mut state = ProcessState::Successful;
        for (file_name, outcome) in join_all(imports).await {
            if let Err(e) = outcome {
                log::error!("Upload failed for {}: {}", file_name, e);
                state = ProcessState::Error;
            }
        }

        self.processes
            .finish_upload(&upload.id, state, Utc::now())
            .await?;
        emit(
            self.events.as_ref(),
            ProcessEvent::UploadFinished {
                upload_id: upload.id.clone(),
                state,
            },
        );
        self.try_get_upload(&upload.id).await
    }

    async fn import_file(
        &self,
        file: UploadFile,
        collection: &RecordCollection,
        upload_id: &str,
    ) -> Result<()> {
        let UploadFile { file_name, reader } = file;
        log::info!("Started import of {}.", file_name);

        let (sender, mut rows) = mpsc::channel(self.config.record_channel_capacity.max(1));
        let schema = collection.schema.clone();
        let reader_task = tokio::task::spawn_blocking(move || read_rows(reader, &schema, sender));

        let batcher = Batcher::spawn(
            BatcherConfig::from(&self.config),
            Arc::new(CommitBatch {
                records: self.records.clone(),
                processes: self.processes.clone(),
                events: self.events.clone(),
                collection_id: collection.id.clone(),
                upload_id: upload_id.to_string(),
            }),
        );

        let mut invalid_entries = 0u64;
        let mut pushed = Ok(());
        while let Some(row) = rows.recv().await {
            match row {
                Some(values) => {
                    if let Err(e) = batcher.push(values).await {
                        pushed = Err(e);
                        break;
                    }
                }
                None => invalid_entries += 1,
            }
        }
        drop(rows);

        let read = reader_task
            .await
            .map_err(|e| EngineError::Ingestion(format!("CSV reader task failed: {}", e)))
            .and_then(|read| read);
        let committed = batcher.finish().await;

        self.processes
            .add_invalid_entries(upload_id, invalid_entries)
            .await?;
        committed?;
        pushed?;
        read?;

        self.processes
            .push_upload_file_name(upload_id, &file_name)
            .await?;
        log::info!("Finished import of {}.", file_name);
        Ok(())
    }

    async fn try_get_upload(&self, id: &str) -> Result<UploadProcess> {
        self.processes
            .get_upload(id)
            .await?
            .ok_or_else(|| EngineError::not_found("upload", id))
    }

    /// Upload record by id
    pub async fn get_upload(&self, id: &str) -> Result<Option<UploadProcess>> {
        self.processes.get_upload(id).await
    }

    /// Uploads of a collection, newest first
    pub async fn list_uploads(&self, collection_id: &str) -> Result<Vec<UploadProcess>> {
        self.processes.list_uploads(collection_id).await
    }
}
