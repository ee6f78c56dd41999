//! # pv-io
//!
//! Event sources for pdfvar.
//!
//! - [`ParquetEventSource`]: columnar event tables (`pdfvar_events_v1`)
//! - [`JsonLinesEventSource`]: one JSON object per line
//! - [`MemoryEventSource`]: records already in memory
//!
//! [`open_event_source`] picks a reader from the file extension.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event_parquet;
pub mod jsonl;
pub mod memory;

use std::path::Path;

use pv_core::{Error, EventSource, Result};

pub use event_parquet::{
    ColumnNames, EVENTS_SCHEMA_V1, META_KEY_SCHEMA_VERSION, ParquetEventSource,
    events_to_record_batch, record_batch_to_events, write_events_parquet,
    write_events_parquet_bytes,
};
pub use jsonl::JsonLinesEventSource;
pub use memory::MemoryEventSource;

/// Input format of an event file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Apache Parquet (`.parquet`, `.pq`).
    Parquet,
    /// JSON lines (`.jsonl`, `.ndjson`).
    JsonLines,
}

impl InputFormat {
    /// Detect from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "parquet" | "pq" => Ok(Self::Parquet),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            _ => Err(Error::Source(format!(
                "unsupported input format: {} (expected .parquet or .jsonl)",
                path.display()
            ))),
        }
    }
}

/// Open an event file, choosing the reader by extension.
pub fn open_event_source(path: &Path) -> Result<Box<dyn EventSource>> {
    let source: Box<dyn EventSource> = match InputFormat::from_path(path)? {
        InputFormat::Parquet => Box::new(ParquetEventSource::open(path)?),
        InputFormat::JsonLines => Box::new(JsonLinesEventSource::open(path)?),
    };
    tracing::debug!(source = %source.describe(), "opened event source");
    Ok(source)
}
