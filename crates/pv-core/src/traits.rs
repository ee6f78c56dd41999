//! Core traits for pdfvar
//!
//! The envelope pipeline does not depend on concrete file formats: it pulls
//! batches of [`EventRecord`]s from an [`EventSource`], and the readers in
//! `pv-io` implement that trait.

use crate::Result;
use crate::types::EventRecord;

/// Row-oriented event reader.
///
/// Records are delivered in batches so readers backed by columnar storage can
/// hand over one decoded row group at a time.
pub trait EventSource {
    /// Next batch of records, `Ok(None)` once the source is exhausted.
    ///
    /// Batches may be empty; callers keep polling until `None`.
    fn next_batch(&mut self) -> Result<Option<Vec<EventRecord>>>;

    /// Total number of records, when known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Human-readable description used in log lines (e.g. a file path).
    fn describe(&self) -> String;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn next_batch(&mut self) -> Result<Option<Vec<EventRecord>>> {
        (**self).next_batch()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
