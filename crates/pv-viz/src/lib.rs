//! # pv-viz
//!
//! Visualization data artifacts for pdfvar.
//!
//! This crate only shapes envelope results into plot-friendly JSON structures
//! (arrays instead of nested objects). Drawing is left to the consumer.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Envelope series artifacts (bin axis or per-bin panel grid).
pub mod series;

pub use series::{
    ENVELOPE_SCHEMA_V0, EnvelopeArtifact, EnvelopeMeta, EnvelopePanel, ParityMode, PanelLayout,
    SeriesOptions, envelope_artifact,
};
