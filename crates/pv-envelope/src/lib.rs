//! # pv-envelope
//!
//! PDF replica envelopes per analysis bin.
//!
//! Events are classified into a passed-in bin table (optionally split further
//! by a secondary kinematic scalar), their replica weights are accumulated per
//! cell by one of two strategies, and each cell is reduced to a 68% band
//! relative to the nominal:
//!
//! - **yield-sum**: sum each replica's weight over the cell's events, take the
//!   16th/84th smallest of the 100 replica yields;
//! - **per-event-ratio**: one `sum(w) / (100 * w0)` ratio per event, take the
//!   16%/84% order statistics over events.
//!
//! ## Example
//!
//! ```
//! use pv_core::EventRecord;
//! use pv_envelope::{EnvelopeConfig, EnvelopePipeline, StrategyKind};
//!
//! let cfg = EnvelopeConfig::reference().strategy(StrategyKind::YieldSum);
//! let pipeline = EnvelopePipeline::new(cfg).unwrap();
//! let results = pipeline.run_events(&[EventRecord::new(1, 4, 0, vec![1.0; 100])]);
//! assert!(results.by_bin_id(22).is_some());
//! assert!(results.by_bin_id(23).is_none());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulate;
pub mod classify;
pub mod config;
pub mod envelope;
pub mod pipeline;

pub use accumulate::{
    AccumulationStrategy, Accumulator, PerEventRatio, SkipStats, WeightSkip, YieldSum,
    YieldSumCell,
};
pub use classify::{BinClassifier, BinInfo, SubBinner, Unclassifiable};
pub use config::{
    BinDef, BinningConfig, CategoryRange, DEFAULT_REPLICAS, EnvelopeConfig, EnvelopeIndices,
    MergeRule, StrategyKind, SubBinInterval, reference_sub_bins, validate_sub_bins,
};
pub use envelope::{Curves, Envelope, per_event_envelope, quantile_indices, yield_sum_envelope};
pub use pipeline::{EnvelopePipeline, EnvelopeResults};
