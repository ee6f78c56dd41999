//! Per-cell replica accumulation.
//!
//! An [`Accumulator`] owns one cell per (bin, sub-bin) key, laid out bin-major.
//! What a cell holds and how it reduces is decided by the
//! [`AccumulationStrategy`]; the event loop, the classification, and the
//! shard merging are shared.

use rayon::prelude::*;
use serde::Serialize;

use pv_core::EventRecord;

use crate::classify::{BinClassifier, SubBinner, Unclassifiable};
use crate::config::{EnvelopeIndices, StrategyKind};
use crate::envelope::{Envelope, per_event_envelope, yield_sum_envelope};

/// Why a weight vector was refused by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightSkip {
    /// Empty (missing) weight vector.
    Missing,
    /// Fewer entries than the strategy needs.
    TooShort,
}

/// Accumulation strategy: cell layout, per-event update, merge, and reduction.
pub trait AccumulationStrategy: Send + Sync {
    /// Per-key accumulator state.
    type Cell: Clone + Send + Sync + PartialEq + std::fmt::Debug;

    /// Strategy selector this implementation answers to.
    fn kind(&self) -> StrategyKind;

    /// Fresh, empty cell.
    fn empty_cell(&self) -> Self::Cell;

    /// Book one event's weights into `cell`.
    fn add(&self, cell: &mut Self::Cell, weights: &[f64]) -> Result<(), WeightSkip>;

    /// Fold `other` into `into` (element-wise sum or concatenation).
    fn merge(&self, into: &mut Self::Cell, other: Self::Cell);

    /// Number of events booked in `cell`.
    fn n_events(&self, cell: &Self::Cell) -> u64;

    /// Reduce a finished cell; `None` means "no data".
    fn reduce(&self, cell: Self::Cell) -> Option<Envelope>;
}

/// Running per-replica sums of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct YieldSumCell {
    /// `sums[k]` = sum of `weight[k]` over the cell's events.
    pub sums: Vec<f64>,
    /// Events booked.
    pub n_events: u64,
}

/// Sum every replica's weight across events; envelope across replicas.
#[derive(Debug, Clone, Copy)]
pub struct YieldSum {
    replicas: usize,
    indices: EnvelopeIndices,
}

impl YieldSum {
    /// `replicas` weights per event, bounds at `indices` of the sorted sums.
    pub fn new(replicas: usize, indices: EnvelopeIndices) -> Self {
        Self { replicas, indices }
    }
}

impl AccumulationStrategy for YieldSum {
    type Cell = YieldSumCell;

    fn kind(&self) -> StrategyKind {
        StrategyKind::YieldSum
    }

    fn empty_cell(&self) -> YieldSumCell {
        YieldSumCell { sums: vec![0.0; self.replicas], n_events: 0 }
    }

    fn add(&self, cell: &mut YieldSumCell, weights: &[f64]) -> Result<(), WeightSkip> {
        if weights.is_empty() {
            return Err(WeightSkip::Missing);
        }
        if weights.len() < self.replicas {
            return Err(WeightSkip::TooShort);
        }
        for (s, w) in cell.sums.iter_mut().zip(&weights[..self.replicas]) {
            *s += w;
        }
        cell.n_events += 1;
        Ok(())
    }

    fn merge(&self, into: &mut YieldSumCell, other: YieldSumCell) {
        for (a, b) in into.sums.iter_mut().zip(other.sums) {
            *a += b;
        }
        into.n_events += other.n_events;
    }

    fn n_events(&self, cell: &YieldSumCell) -> u64 {
        cell.n_events
    }

    fn reduce(&self, cell: YieldSumCell) -> Option<Envelope> {
        yield_sum_envelope(&cell.sums, cell.n_events, self.indices)
    }
}

/// One ratio per event; envelope across events.
///
/// `ratio = sum(weight[..min(len, replicas)]) / (weight[0] * replicas)`.
/// The divisor keeps the configured replica count even when the vector is
/// shorter, and becomes `1.0` when the nominal weight is zero.
#[derive(Debug, Clone, Copy)]
pub struct PerEventRatio {
    replicas: usize,
}

impl PerEventRatio {
    /// Normalize by `replicas` times the nominal weight.
    pub fn new(replicas: usize) -> Self {
        Self { replicas }
    }

    /// Ratio for one weight vector, `None` when the vector is empty.
    pub fn ratio(&self, weights: &[f64]) -> Option<f64> {
        let nominal = *weights.first()?;
        let limit = weights.len().min(self.replicas);
        let sum: f64 = weights[..limit].iter().sum();
        let divisor = if nominal == 0.0 { 1.0 } else { nominal * self.replicas as f64 };
        Some(sum / divisor)
    }
}

impl AccumulationStrategy for PerEventRatio {
    type Cell = Vec<f64>;

    fn kind(&self) -> StrategyKind {
        StrategyKind::PerEventRatio
    }

    fn empty_cell(&self) -> Vec<f64> {
        Vec::new()
    }

    fn add(&self, cell: &mut Vec<f64>, weights: &[f64]) -> Result<(), WeightSkip> {
        let r = self.ratio(weights).ok_or(WeightSkip::Missing)?;
        cell.push(r);
        Ok(())
    }

    fn merge(&self, into: &mut Vec<f64>, mut other: Vec<f64>) {
        into.append(&mut other);
    }

    fn n_events(&self, cell: &Vec<f64>) -> u64 {
        cell.len() as u64
    }

    fn reduce(&self, cell: Vec<f64>) -> Option<Envelope> {
        per_event_envelope(cell)
    }
}

/// Per-reason counts of events left out of accumulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkipStats {
    /// Events booked into a cell.
    pub accepted: u64,
    /// Empty weight vector.
    pub missing_weights: u64,
    /// Lepton multiplicity mismatch.
    pub lepton_count: u64,
    /// No jet/b-tag category or no enumerated bin.
    pub unclassified_bin: u64,
    /// Secondary scalar missing or outside every sub-bin.
    pub unclassified_sub_bin: u64,
    /// Weight vector shorter than the strategy needs.
    pub short_weights: u64,
}

impl SkipStats {
    /// Events seen (accepted + skipped).
    pub fn total(&self) -> u64 {
        self.accepted + self.skipped()
    }

    /// Events skipped for any reason.
    pub fn skipped(&self) -> u64 {
        self.missing_weights
            + self.lepton_count
            + self.unclassified_bin
            + self.unclassified_sub_bin
            + self.short_weights
    }

    fn merge(&mut self, o: &SkipStats) {
        self.accepted += o.accepted;
        self.missing_weights += o.missing_weights;
        self.lepton_count += o.lepton_count;
        self.unclassified_bin += o.unclassified_bin;
        self.unclassified_sub_bin += o.unclassified_sub_bin;
        self.short_weights += o.short_weights;
    }
}

/// Batches shorter than this are accumulated on the calling thread.
pub const PAR_THRESHOLD: usize = 8_000;
/// Shard size for parallel accumulation.
pub const PAR_CHUNK: usize = 1024;

/// Accumulation state for one pass.
#[derive(Debug, Clone)]
pub struct Accumulator<'a, S: AccumulationStrategy> {
    strategy: &'a S,
    classifier: &'a BinClassifier,
    sub_binner: Option<&'a SubBinner>,
    cells: Vec<S::Cell>,
    stats: SkipStats,
}

impl<'a, S: AccumulationStrategy> Accumulator<'a, S> {
    /// Empty accumulator with one cell per (bin, sub-bin).
    pub fn new(
        strategy: &'a S,
        classifier: &'a BinClassifier,
        sub_binner: Option<&'a SubBinner>,
    ) -> Self {
        let n_sub = sub_binner.map_or(1, SubBinner::len);
        let cells = vec![strategy.empty_cell(); classifier.len() * n_sub];
        Self { strategy, classifier, sub_binner, cells, stats: SkipStats::default() }
    }

    /// Strategy driving this accumulator.
    pub fn strategy(&self) -> &'a S {
        self.strategy
    }

    /// Sub-bins per bin (1 without sub-binning).
    pub fn n_sub(&self) -> usize {
        self.sub_binner.map_or(1, SubBinner::len)
    }

    /// Book one event. Unusable events are counted and dropped.
    pub fn push(&mut self, ev: &EventRecord) {
        if ev.weight.is_empty() {
            self.stats.missing_weights += 1;
            return;
        }
        let bin = match self.classifier.locate(ev.nleps, ev.njets, ev.nbm) {
            Ok(idx) => idx,
            Err(Unclassifiable::LeptonCount) => {
                self.stats.lepton_count += 1;
                return;
            }
            Err(_) => {
                self.stats.unclassified_bin += 1;
                return;
            }
        };
        let sub = match self.sub_binner {
            None => 0,
            Some(sb) => match ev.mj12.and_then(|x| sb.sub_bin(x)) {
                Some(s) => s,
                None => {
                    self.stats.unclassified_sub_bin += 1;
                    return;
                }
            },
        };

        let n_sub = self.n_sub();
        match self.strategy.add(&mut self.cells[bin * n_sub + sub], &ev.weight) {
            Ok(()) => self.stats.accepted += 1,
            Err(WeightSkip::Missing) => self.stats.missing_weights += 1,
            Err(WeightSkip::TooShort) => self.stats.short_weights += 1,
        }
    }

    /// Book events sequentially, in order.
    pub fn extend<'e>(&mut self, events: impl IntoIterator<Item = &'e EventRecord>) {
        for ev in events {
            self.push(ev);
        }
    }

    /// Fold another accumulator over the same layout into this one.
    pub fn merge(&mut self, other: Self) {
        debug_assert_eq!(self.cells.len(), other.cells.len());
        for (a, b) in self.cells.iter_mut().zip(other.cells) {
            self.strategy.merge(a, b);
        }
        self.stats.merge(&other.stats);
    }

    /// Accumulate `events` in shards of `chunk` events and merge the shards.
    ///
    /// Cell contents match [`extend`](Self::extend) up to floating-point
    /// summation order (and list order, which reduction sorts away).
    pub fn extend_sharded(&mut self, events: &[EventRecord], chunk: usize) {
        let (strategy, classifier, sub_binner) = (self.strategy, self.classifier, self.sub_binner);
        let merged = events
            .par_chunks(chunk.max(1))
            .fold(
                || Accumulator::new(strategy, classifier, sub_binner),
                |mut acc, shard| {
                    acc.extend(shard);
                    acc
                },
            )
            .reduce(
                || Accumulator::new(strategy, classifier, sub_binner),
                |mut a, b| {
                    a.merge(b);
                    a
                },
            );
        self.merge(merged);
    }

    /// Sequential for small batches, sharded across the rayon pool otherwise.
    pub fn extend_batch(&mut self, events: &[EventRecord]) {
        // Stay sequential when already on a rayon worker.
        let can_par = rayon::current_thread_index().is_none() && rayon::current_num_threads() > 1;
        if can_par && events.len() >= PAR_THRESHOLD {
            self.extend_sharded(events, PAR_CHUNK);
        } else {
            self.extend(events);
        }
    }

    /// Cells, bin-major (`bin * n_sub + sub`).
    pub fn cells(&self) -> &[S::Cell] {
        &self.cells
    }

    /// Cell of (enumeration index, sub-bin index).
    pub fn cell(&self, bin: usize, sub: usize) -> Option<&S::Cell> {
        let n_sub = self.n_sub();
        if sub >= n_sub {
            return None;
        }
        self.cells.get(bin * n_sub + sub)
    }

    /// Skip statistics so far.
    pub fn stats(&self) -> SkipStats {
        self.stats
    }

    /// Reduce every cell, one rayon task per cell.
    pub fn finish(self) -> (Vec<Option<Envelope>>, SkipStats) {
        let strategy = self.strategy;
        let envelopes = self.cells.into_par_iter().map(|c| strategy.reduce(c)).collect();
        (envelopes, self.stats)
    }
}
