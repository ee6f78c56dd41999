//! `pdfvar convert`: JSON-lines events → Parquet.

use anyhow::{Context, Result};
use std::path::Path;

use pv_core::{EventRecord, EventSource};
use pv_io::{JsonLinesEventSource, write_events_parquet};

pub fn cmd_convert(input: &Path, output: &Path, max_events: Option<usize>) -> Result<()> {
    tracing::info!("reading JSON-lines events: {}", input.display());
    let mut source = JsonLinesEventSource::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    let mut events: Vec<EventRecord> = Vec::new();
    while let Some(batch) = source.next_batch()? {
        events.extend(batch);
        if max_events.is_some_and(|max| events.len() >= max) {
            break;
        }
    }
    if let Some(max) = max_events
        && events.len() > max
    {
        tracing::info!("truncating to {max} events (--max-events)");
        events.truncate(max);
    }

    let n = events.len();
    tracing::info!("writing Parquet to {}", output.display());
    write_events_parquet(&events, output)
        .with_context(|| format!("failed to write Parquet {}", output.display()))?;

    let file_size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    eprintln!("Converted {n} events → {} ({:.1} KB)", output.display(), file_size as f64 / 1024.0);

    Ok(())
}
