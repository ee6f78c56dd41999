//! EnvelopePipeline: orchestrates event reading, accumulation, and reduction.

use pv_core::{EventRecord, EventSource, Result};

use crate::accumulate::{AccumulationStrategy, Accumulator, PerEventRatio, SkipStats, YieldSum};
use crate::classify::{BinClassifier, BinInfo, SubBinner};
use crate::config::{EnvelopeConfig, StrategyKind};
use crate::envelope::Envelope;

/// Finished envelopes of one pass.
#[derive(Debug, Clone)]
pub struct EnvelopeResults {
    /// Strategy that produced the cells.
    pub strategy: StrategyKind,
    /// Replica count used.
    pub replicas: usize,
    /// Enumerated bins in output order.
    pub bins: Vec<BinInfo>,
    /// Grid shape `(rows, cols)` of the bin table.
    pub grid_shape: (usize, usize),
    /// Sub-bin labels, `None` without sub-binning.
    pub sub_bin_labels: Option<Vec<String>>,
    /// Reduced cells, bin-major; `None` for "no data".
    pub cells: Vec<Option<Envelope>>,
    /// Accepted/skipped event counts.
    pub stats: SkipStats,
}

impl EnvelopeResults {
    /// Sub-bins per bin (1 without sub-binning).
    pub fn n_sub(&self) -> usize {
        self.sub_bin_labels.as_ref().map_or(1, Vec::len)
    }

    /// Envelope of (enumeration index, sub-bin index).
    pub fn cell(&self, bin: usize, sub: usize) -> Option<&Envelope> {
        let n_sub = self.n_sub();
        if bin >= self.bins.len() || sub >= n_sub {
            return None;
        }
        self.cells[bin * n_sub + sub].as_ref()
    }

    /// Envelope of a bin id (first sub-bin).
    pub fn by_bin_id(&self, id: pv_core::BinId) -> Option<&Envelope> {
        let idx = self.bins.iter().position(|b| b.id == id)?;
        self.cell(idx, 0)
    }

    /// Cells of one bin, in sub-bin order.
    pub fn bin_cells(&self, bin: usize) -> &[Option<Envelope>] {
        let n_sub = self.n_sub();
        &self.cells[bin * n_sub..(bin + 1) * n_sub]
    }
}

/// Validated pipeline.
///
/// # Example
///
/// ```
/// use pv_core::EventRecord;
/// use pv_envelope::{EnvelopeConfig, EnvelopePipeline};
///
/// let pipeline = EnvelopePipeline::new(EnvelopeConfig::reference()).unwrap();
/// let results = pipeline.run_events(&[EventRecord::new(1, 6, 2, vec![10.0; 100])]);
/// let env = results.by_bin_id(29).unwrap();
/// assert_eq!((env.low, env.high), (1.0, 1.0));
/// ```
#[derive(Debug, Clone)]
pub struct EnvelopePipeline {
    config: EnvelopeConfig,
    classifier: BinClassifier,
    sub_binner: Option<SubBinner>,
}

impl EnvelopePipeline {
    /// Validate `config`; malformed configurations never reach the event loop.
    pub fn new(config: EnvelopeConfig) -> Result<Self> {
        config.validate()?;
        let classifier = BinClassifier::new(&config.binning)?;
        let sub_binner = config.sub_binning.clone().map(SubBinner::new).transpose()?;
        tracing::debug!(
            strategy = %config.strategy,
            replicas = config.replicas,
            bins = classifier.len(),
            sub_bins = sub_binner.as_ref().map_or(0, SubBinner::len),
            "pipeline configured"
        );
        Ok(Self { config, classifier, sub_binner })
    }

    /// Configuration in use.
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Bin classifier in use.
    pub fn classifier(&self) -> &BinClassifier {
        &self.classifier
    }

    /// Drain `source` and reduce.
    pub fn run(&self, source: &mut dyn EventSource) -> Result<EnvelopeResults> {
        match self.config.strategy {
            StrategyKind::YieldSum => {
                let s = YieldSum::new(self.config.replicas, self.config.envelope_indices);
                self.run_source_with(&s, source)
            }
            StrategyKind::PerEventRatio => {
                let s = PerEventRatio::new(self.config.replicas);
                self.run_source_with(&s, source)
            }
        }
    }

    /// Accumulate an in-memory slice and reduce.
    pub fn run_events(&self, events: &[EventRecord]) -> EnvelopeResults {
        match self.config.strategy {
            StrategyKind::YieldSum => {
                let s = YieldSum::new(self.config.replicas, self.config.envelope_indices);
                let mut acc = self.accumulator(&s);
                acc.extend_batch(events);
                self.reduce(acc)
            }
            StrategyKind::PerEventRatio => {
                let s = PerEventRatio::new(self.config.replicas);
                let mut acc = self.accumulator(&s);
                acc.extend_batch(events);
                self.reduce(acc)
            }
        }
    }

    /// Fresh accumulator wired to this pipeline's classifier and sub-binning.
    pub fn accumulator<'a, S: AccumulationStrategy>(
        &'a self,
        strategy: &'a S,
    ) -> Accumulator<'a, S> {
        Accumulator::new(strategy, &self.classifier, self.sub_binner.as_ref())
    }

    fn run_source_with<S: AccumulationStrategy>(
        &self,
        strategy: &S,
        source: &mut dyn EventSource,
    ) -> Result<EnvelopeResults> {
        match source.len_hint() {
            Some(n) => {
                tracing::info!(source = %source.describe(), events = n, "accumulating weights")
            }
            None => tracing::info!(source = %source.describe(), "accumulating weights"),
        }

        let mut acc = self.accumulator(strategy);
        let mut n_batches = 0usize;
        while let Some(batch) = source.next_batch()? {
            acc.extend_batch(&batch);
            n_batches += 1;
            tracing::debug!(batch = n_batches, rows = batch.len(), "batch accumulated");
        }

        Ok(self.reduce(acc))
    }

    fn reduce<S: AccumulationStrategy>(&self, acc: Accumulator<'_, S>) -> EnvelopeResults {
        let stats = acc.stats();
        let strategy = acc.strategy();
        let occupied = acc.cells().iter().filter(|c| strategy.n_events(c) > 0).count();
        tracing::info!(
            strategy = %strategy.kind(),
            accepted = stats.accepted,
            occupied_cells = occupied,
            skipped = stats.skipped(),
            lepton_count = stats.lepton_count,
            unclassified_bin = stats.unclassified_bin,
            unclassified_sub_bin = stats.unclassified_sub_bin,
            missing_weights = stats.missing_weights,
            short_weights = stats.short_weights,
            "accumulation done"
        );

        let (cells, stats) = acc.finish();

        let n_sub = self.sub_binner.as_ref().map_or(1, SubBinner::len);
        for (i, cell) in cells.iter().enumerate() {
            if cell.is_none() {
                let bin = &self.classifier.bins()[i / n_sub];
                tracing::debug!(bin = bin.id, sub_bin = i % n_sub, "no data");
            }
        }
        tracing::info!(
            cells = cells.len(),
            with_data = cells.iter().filter(|c| c.is_some()).count(),
            "envelopes computed"
        );

        EnvelopeResults {
            strategy: self.config.strategy,
            replicas: self.config.replicas,
            bins: self.classifier.bins().to_vec(),
            grid_shape: self.classifier.grid_shape(),
            sub_bin_labels: self.sub_binner.as_ref().map(SubBinner::labels),
            cells,
            stats,
        }
    }
}
