//! Parquet / Arrow event I/O.
//!
//! # Schema: `pdfvar_events_v1`
//!
//! | Column   | Arrow Type                          | Required | Description                   |
//! |----------|-------------------------------------|----------|-------------------------------|
//! | `nleps`  | any integer                         | yes      | Lepton multiplicity           |
//! | `njets`  | any integer                         | yes      | Jet multiplicity              |
//! | `nbm`    | any integer                         | yes      | b-tagged jet multiplicity     |
//! | `mj12`   | `Float32` / `Float64` / integer     | no       | Secondary kinematic scalar    |
//! | `weight` | `List` / `LargeList` of `Float32/64`| yes      | Nominal + replica weights     |
//!
//! Column names can be remapped with [`ColumnNames`]. A null `weight` row (or
//! one holding null elements) is delivered as an empty weight vector, which the
//! accumulator skips. Rows with a null multiplicity are dropped by the reader.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, Float64Builder, Int32Array, ListBuilder,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use pv_core::{Error, EventRecord, EventSource, Result};

/// Schema version string embedded in Parquet key-value metadata.
pub const EVENTS_SCHEMA_V1: &str = "pdfvar_events_v1";

/// Parquet metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "pdfvar.schema_version";

/// Default rows per decoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 65_536;

/// Column names of the event table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnNames {
    /// Lepton multiplicity column.
    pub nleps: String,
    /// Jet multiplicity column.
    pub njets: String,
    /// b-tag multiplicity column.
    pub nbm: String,
    /// Secondary scalar column (optional in the file).
    pub mj12: String,
    /// Weight list column.
    pub weight: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            nleps: "nleps".into(),
            njets: "njets".into(),
            nbm: "nbm".into(),
            mj12: "mj12".into(),
            weight: "weight".into(),
        }
    }
}

/// Streaming reader over a Parquet event table, one row group slice per batch.
pub struct ParquetEventSource {
    reader: ParquetRecordBatchReader,
    columns: ColumnNames,
    n_rows: usize,
    description: String,
    null_rows: usize,
}

impl ParquetEventSource {
    /// Open a Parquet file with default column names.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, ColumnNames::default(), DEFAULT_BATCH_SIZE)
    }

    /// Open a Parquet file with custom column names and batch size.
    pub fn open_with(path: &Path, columns: ColumnNames, batch_size: usize) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("failed to open {}: {e}", path.display())))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Source(format!("invalid Parquet file {}: {e}", path.display())))?;
        Self::from_builder(builder, columns, batch_size, path.display().to_string())
    }

    /// Read Parquet data from an in-memory buffer.
    pub fn from_bytes(data: &[u8], columns: ColumnNames) -> Result<Self> {
        let buf = bytes::Bytes::copy_from_slice(data);
        let builder = ParquetRecordBatchReaderBuilder::try_new(buf)
            .map_err(|e| Error::Source(format!("invalid Parquet buffer: {e}")))?;
        Self::from_builder(builder, columns, DEFAULT_BATCH_SIZE, "<memory>".into())
    }

    fn from_builder<T: parquet::file::reader::ChunkReader + 'static>(
        builder: ParquetRecordBatchReaderBuilder<T>,
        columns: ColumnNames,
        batch_size: usize,
        description: String,
    ) -> Result<Self> {
        let n_rows = usize::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);
        if let Some(v) = builder
            .schema()
            .metadata()
            .get(META_KEY_SCHEMA_VERSION)
            .filter(|v| v.as_str() != EVENTS_SCHEMA_V1)
        {
            tracing::warn!(schema_version = %v, "unexpected event schema version");
        }
        let reader = builder
            .with_batch_size(batch_size.max(1))
            .build()
            .map_err(|e| Error::Source(format!("failed to build Parquet reader: {e}")))?;
        Ok(Self { reader, columns, n_rows, description, null_rows: 0 })
    }

    /// Rows dropped so far because a multiplicity was null.
    pub fn null_rows(&self) -> usize {
        self.null_rows
    }
}

impl EventSource for ParquetEventSource {
    fn next_batch(&mut self) -> Result<Option<Vec<EventRecord>>> {
        match self.reader.next() {
            None => {
                if self.null_rows > 0 {
                    tracing::warn!(rows = self.null_rows, "dropped rows with null multiplicities");
                }
                Ok(None)
            }
            Some(batch) => {
                let batch = batch
                    .map_err(|e| Error::Source(format!("failed to decode Parquet batch: {e}")))?;
                let (events, dropped) = record_batch_to_events(&batch, &self.columns)?;
                self.null_rows += dropped;
                Ok(Some(events))
            }
        }
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.n_rows)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

fn column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Source(format!("missing required column: {name}")))
}

fn int_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    let col = column(batch, name)?;
    if !col.data_type().is_integer() {
        return Err(Error::Source(format!(
            "column '{name}' has wrong type: expected integer, got {:?}",
            col.data_type()
        )));
    }
    cast(col, &DataType::Int64).map_err(|e| Error::Source(format!("casting '{name}': {e}")))
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Option<ArrayRef>> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let dt = col.data_type();
    if !(dt.is_floating() || dt.is_integer() || matches!(dt, DataType::Null)) {
        return Err(Error::Source(format!(
            "column '{name}' has wrong type: expected Float64, got {dt:?}"
        )));
    }
    cast(col, &DataType::Float64)
        .map(Some)
        .map_err(|e| Error::Source(format!("casting '{name}': {e}")))
}

fn list_f64_type() -> DataType {
    DataType::List(Arc::new(Field::new_list_field(DataType::Float64, true)))
}

fn weight_column(batch: &RecordBatch, name: &str) -> Result<ArrayRef> {
    let col = column(batch, name)?;
    match col.data_type() {
        DataType::List(f) | DataType::LargeList(f) if f.data_type().is_floating() => {}
        other => {
            return Err(Error::Source(format!(
                "column '{name}' has wrong type: expected List<Float64>, got {other:?}"
            )));
        }
    }
    cast(col, &list_f64_type()).map_err(|e| Error::Source(format!("casting '{name}': {e}")))
}

fn to_i32(v: i64, name: &str, row: usize) -> Result<i32> {
    i32::try_from(v)
        .map_err(|_| Error::Source(format!("row {row}: column '{name}' value {v} out of range")))
}

/// Convert one Arrow batch into event records.
///
/// Returns the records and the number of rows dropped for null multiplicities.
pub fn record_batch_to_events(
    batch: &RecordBatch,
    columns: &ColumnNames,
) -> Result<(Vec<EventRecord>, usize)> {
    let nleps = int_column(batch, &columns.nleps)?;
    let njets = int_column(batch, &columns.njets)?;
    let nbm = int_column(batch, &columns.nbm)?;
    let mj12 = float_column(batch, &columns.mj12)?;
    let weight = weight_column(batch, &columns.weight)?;

    let nleps = nleps.as_primitive::<Int64Type>();
    let njets = njets.as_primitive::<Int64Type>();
    let nbm = nbm.as_primitive::<Int64Type>();
    let mj12 = mj12.as_ref().map(|a| a.as_primitive::<Float64Type>());
    let weight = weight.as_list::<i32>();

    let mut events = Vec::with_capacity(batch.num_rows());
    let mut dropped = 0usize;

    for row in 0..batch.num_rows() {
        if nleps.is_null(row) || njets.is_null(row) || nbm.is_null(row) {
            dropped += 1;
            continue;
        }

        let w = if weight.is_null(row) {
            Vec::new()
        } else {
            let values = weight.value(row);
            let values = values.as_primitive::<Float64Type>();
            if values.null_count() > 0 { Vec::new() } else { values.values().to_vec() }
        };

        events.push(EventRecord {
            nleps: to_i32(nleps.value(row), &columns.nleps, row)?,
            njets: to_i32(njets.value(row), &columns.njets, row)?,
            nbm: to_i32(nbm.value(row), &columns.nbm, row)?,
            mj12: mj12.filter(|a| a.is_valid(row)).map(|a| a.value(row)),
            weight: w,
        });
    }

    Ok((events, dropped))
}

/// Build an Arrow [`RecordBatch`] in the `pdfvar_events_v1` schema.
///
/// Empty weight vectors are written as null list entries.
pub fn events_to_record_batch(events: &[EventRecord]) -> Result<RecordBatch> {
    let metadata =
        HashMap::from([(META_KEY_SCHEMA_VERSION.to_string(), EVENTS_SCHEMA_V1.to_string())]);
    let schema = Arc::new(
        Schema::new(vec![
            Field::new("nleps", DataType::Int32, false),
            Field::new("njets", DataType::Int32, false),
            Field::new("nbm", DataType::Int32, false),
            Field::new("mj12", DataType::Float64, true),
            Field::new("weight", list_f64_type(), true),
        ])
        .with_metadata(metadata),
    );

    let mut weights = ListBuilder::new(Float64Builder::new());
    for ev in events {
        if ev.weight.is_empty() {
            weights.append(false);
        } else {
            weights.values().append_slice(&ev.weight);
            weights.append(true);
        }
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from_iter_values(events.iter().map(|e| e.nleps))),
        Arc::new(Int32Array::from_iter_values(events.iter().map(|e| e.njets))),
        Arc::new(Int32Array::from_iter_values(events.iter().map(|e| e.nbm))),
        Arc::new(events.iter().map(|e| e.mj12).collect::<Float64Array>()),
        Arc::new(weights.finish()),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| Error::Validation(format!("failed to build RecordBatch: {e}")))
}

fn writer_props() -> WriterProperties {
    WriterProperties::builder().set_compression(Compression::SNAPPY).build()
}

/// Write events to a Parquet file.
pub fn write_events_parquet(events: &[EventRecord], path: &Path) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::Source(format!("failed to create {}: {e}", path.display())))?;
    write_to(events, file)
}

/// Write events to Parquet bytes in memory.
pub fn write_events_parquet_bytes(events: &[EventRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_to(events, &mut buf)?;
    Ok(buf)
}

fn write_to<W: std::io::Write + Send>(events: &[EventRecord], sink: W) -> Result<()> {
    let batch = events_to_record_batch(events)?;
    let mut writer = ArrowWriter::try_new(sink, batch.schema(), Some(writer_props()))
        .map_err(|e| Error::Source(format!("failed to create Parquet writer: {e}")))?;
    writer.write(&batch).map_err(|e| Error::Source(format!("failed to write Parquet: {e}")))?;
    writer.close().map_err(|e| Error::Source(format!("failed to close Parquet writer: {e}")))?;
    Ok(())
}
