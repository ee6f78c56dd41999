//! JSON-lines event reader.
//!
//! One [`EventRecord`] object per line:
//!
//! ```text
//! {"nleps":1,"njets":6,"nbm":2,"mj12":950.0,"weight":[1.0,1.02,0.98]}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use pv_core::{Error, EventRecord, EventSource, Result};

/// Default records per batch.
pub const DEFAULT_JSONL_BATCH: usize = 4096;

/// Streaming JSON-lines reader.
pub struct JsonLinesEventSource<R: BufRead> {
    reader: R,
    batch_size: usize,
    line_no: usize,
    description: String,
    done: bool,
}

impl JsonLinesEventSource<BufReader<File>> {
    /// Open a `.jsonl` file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: BufRead> JsonLinesEventSource<R> {
    /// Wrap any buffered reader.
    pub fn new(reader: R, description: impl Into<String>) -> Self {
        Self {
            reader,
            batch_size: DEFAULT_JSONL_BATCH,
            line_no: 0,
            description: description.into(),
            done: false,
        }
    }

    /// Set the batch size (minimum 1).
    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }
}

impl<R: BufRead> EventSource for JsonLinesEventSource<R> {
    fn next_batch(&mut self) -> Result<Option<Vec<EventRecord>>> {
        if self.done {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.batch_size);
        let mut line = String::new();
        while out.len() < self.batch_size {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                self.done = true;
                break;
            }
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let ev: EventRecord = serde_json::from_str(trimmed).map_err(|e| {
                Error::Source(format!("{}:{}: invalid event: {e}", self.description, self.line_no))
            })?;
            out.push(ev);
        }

        if out.is_empty() && self.done { Ok(None) } else { Ok(Some(out)) }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LINES: &str = r#"# nleps njets nbm weight
{"nleps":1,"njets":6,"nbm":2,"weight":[1.0,2.0]}

{"nleps":0,"njets":4,"nbm":0,"mj12":620.5,"weight":[1.0]}
{"nleps":1,"njets":9,"nbm":5}
"#;

    #[test]
    fn test_reads_records_skipping_comments_and_blanks() {
        let mut src = JsonLinesEventSource::new(Cursor::new(LINES), "inline").with_batch_size(2);
        let first = src.next_batch().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], EventRecord::new(1, 6, 2, vec![1.0, 2.0]));
        assert_eq!(first[1].mj12, Some(620.5));

        let second = src.next_batch().unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].weight.is_empty());

        assert!(src.next_batch().unwrap().is_none());
        assert!(src.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let text = "{\"nleps\":1,\"njets\":6,\"nbm\":2}\n{\"nleps\":\"x\"}\n";
        let mut src = JsonLinesEventSource::new(Cursor::new(text), "bad.jsonl");
        let err = src.next_batch().unwrap_err();
        assert!(matches!(err, Error::Source(_)));
        assert!(err.to_string().contains("bad.jsonl:2"), "{err}");
    }

    #[test]
    fn test_empty_input() {
        let mut src = JsonLinesEventSource::new(Cursor::new(""), "empty");
        assert!(src.next_batch().unwrap().is_none());
        assert_eq!(src.len_hint(), None);
    }

    #[test]
    fn test_null_weights_are_per_event_skips() {
        use pv_envelope::{EnvelopeConfig, EnvelopePipeline};

        let text = concat!(
            "{\"nleps\":1,\"njets\":6,\"nbm\":2,\"weight\":[1.0,1.0]}\n",
            "{\"nleps\":1,\"njets\":6,\"nbm\":2,\"weight\":null}\n",
            "{\"nleps\":1,\"njets\":6,\"nbm\":2,\"weight\":[1.0,null]}\n",
        );
        let mut src = JsonLinesEventSource::new(Cursor::new(text), "nulls.jsonl");
        let batch = src.next_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch[1].weight.is_empty());
        assert!(batch[2].weight.is_empty());

        let cfg = EnvelopeConfig::reference().replicas(2).envelope_indices(0, 1);
        let mut src = JsonLinesEventSource::new(Cursor::new(text), "nulls.jsonl");
        let results = EnvelopePipeline::new(cfg).unwrap().run(&mut src).unwrap();
        assert_eq!(results.stats.accepted, 1);
        assert_eq!(results.stats.missing_weights, 2);
    }
}
