//! Configuration types for the envelope pipeline.
//!
//! Everything the pipeline indexes by (bin enumeration, merge rules, sub-bin
//! intervals, replica count, order-statistic positions) lives here as plain
//! data. [`EnvelopeConfig::validate`] must pass before any event is read.

use std::fmt;
use std::str::FromStr;

use pv_core::{BinId, Error, Result};
use serde::{Deserialize, Serialize};

/// Number of replica weights (nominal included) in the reference configuration.
pub const DEFAULT_REPLICAS: usize = 100;

/// Accumulation strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Sum each replica weight over all events of a bin, envelope across replicas.
    #[default]
    YieldSum,
    /// One ratio per event, envelope across events.
    PerEventRatio,
}

impl StrategyKind {
    /// Stable identifier used in artifacts and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::YieldSum => "yield_sum",
            StrategyKind::PerEventRatio => "per_event_ratio",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "yield_sum" => Ok(StrategyKind::YieldSum),
            "per_event_ratio" => Ok(StrategyKind::PerEventRatio),
            other => Err(Error::Validation(format!(
                "unknown strategy '{other}': expected 'yield-sum' or 'per-event-ratio'"
            ))),
        }
    }
}

/// Inclusive integer range; `max = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRange {
    /// Lower edge (inclusive).
    pub min: i32,
    /// Upper edge (inclusive), `None` for no upper edge.
    #[serde(default)]
    pub max: Option<i32>,
}

impl CategoryRange {
    /// Closed range `[min, max]`.
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max: Some(max) }
    }

    /// Single value.
    pub fn exactly(v: i32) -> Self {
        Self::new(v, v)
    }

    /// Open range `[min, inf)`.
    pub fn at_least(min: i32) -> Self {
        Self { min, max: None }
    }

    /// Membership test.
    #[inline]
    pub fn contains(&self, v: i32) -> bool {
        v >= self.min && self.max.is_none_or(|hi| v <= hi)
    }

    fn overlaps(&self, other: &CategoryRange) -> bool {
        let a_hi = self.max.unwrap_or(i32::MAX);
        let b_hi = other.max.unwrap_or(i32::MAX);
        self.min <= b_hi && other.min <= a_hi
    }
}

/// One enumerated bin: the (jet category, b-tag category) cell it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinDef {
    /// Bin identifier.
    pub id: BinId,
    /// Index into [`BinningConfig::jet_categories`].
    pub jet: usize,
    /// Index into [`BinningConfig::btag_categories`].
    pub btag: usize,
}

/// Merge-on-overflow rule: events falling in cell `(jet, btag)` are booked
/// into the already enumerated bin `into`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRule {
    /// Jet category index of the merged cell.
    pub jet: usize,
    /// B-tag category index of the merged cell.
    pub btag: usize,
    /// Target bin id (must be enumerated).
    pub into: BinId,
}

/// Bin enumeration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinningConfig {
    /// Required lepton multiplicity.
    pub lepton_count: i32,
    /// Jet multiplicity categories (column of the grid layout).
    pub jet_categories: Vec<CategoryRange>,
    /// B-tag multiplicity categories (row of the grid layout).
    pub btag_categories: Vec<CategoryRange>,
    /// Enumerated bins, in output order.
    pub bins: Vec<BinDef>,
    /// Merge-on-overflow rules.
    #[serde(default)]
    pub merges: Vec<MergeRule>,
}

impl BinningConfig {
    /// Single-lepton table: 3 jet categories x 5 b-tag categories, 14 bins.
    ///
    /// The (4-5 jets, >=4 b) cell is merged into bin 31 and bin 34 does not exist.
    pub fn reference() -> Self {
        let jet_categories =
            vec![CategoryRange::new(4, 5), CategoryRange::new(6, 7), CategoryRange::at_least(8)];
        let btag_categories = vec![
            CategoryRange::exactly(0),
            CategoryRange::exactly(1),
            CategoryRange::exactly(2),
            CategoryRange::exactly(3),
            CategoryRange::at_least(4),
        ];

        let mut bins = Vec::with_capacity(14);
        for (btag, base) in [22, 25, 28, 31].into_iter().enumerate() {
            for jet in 0..3 {
                bins.push(BinDef { id: base + jet as BinId, jet, btag });
            }
        }
        bins.push(BinDef { id: 35, jet: 1, btag: 4 });
        bins.push(BinDef { id: 36, jet: 2, btag: 4 });

        Self {
            lepton_count: 1,
            jet_categories,
            btag_categories,
            bins,
            merges: vec![MergeRule { jet: 0, btag: 4, into: 31 }],
        }
    }

    /// Check table consistency.
    pub fn validate(&self) -> Result<()> {
        validate_categories("jet", &self.jet_categories)?;
        validate_categories("b-tag", &self.btag_categories)?;

        if self.bins.is_empty() {
            return Err(Error::Validation("bin enumeration is empty".into()));
        }

        let n_jet = self.jet_categories.len();
        let n_btag = self.btag_categories.len();
        let mut cell_owner: Vec<Option<String>> = vec![None; n_jet * n_btag];

        for (i, b) in self.bins.iter().enumerate() {
            if self.bins[..i].iter().any(|other| other.id == b.id) {
                return Err(Error::Validation(format!("duplicate bin id {}", b.id)));
            }
            let cell = cell_index(b.jet, b.btag, n_jet, n_btag).ok_or_else(|| {
                Error::Validation(format!(
                    "bin {} refers to cell (jet={}, btag={}) outside the {}x{} category grid",
                    b.id, b.jet, b.btag, n_jet, n_btag
                ))
            })?;
            if let Some(owner) = &cell_owner[cell] {
                return Err(Error::Validation(format!(
                    "bin {} claims cell (jet={}, btag={}) already taken by {}",
                    b.id, b.jet, b.btag, owner
                )));
            }
            cell_owner[cell] = Some(format!("bin {}", b.id));
        }

        for m in &self.merges {
            if !self.bins.iter().any(|b| b.id == m.into) {
                return Err(Error::Validation(format!(
                    "merge rule (jet={}, btag={}) targets bin {} which is not enumerated",
                    m.jet, m.btag, m.into
                )));
            }
            let cell = cell_index(m.jet, m.btag, n_jet, n_btag).ok_or_else(|| {
                Error::Validation(format!(
                    "merge rule cell (jet={}, btag={}) outside the {}x{} category grid",
                    m.jet, m.btag, n_jet, n_btag
                ))
            })?;
            if let Some(owner) = &cell_owner[cell] {
                return Err(Error::Validation(format!(
                    "merge rule cell (jet={}, btag={}) already taken by {}",
                    m.jet, m.btag, owner
                )));
            }
            cell_owner[cell] = Some(format!("merge into {}", m.into));
        }

        Ok(())
    }
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self::reference()
    }
}

pub(crate) fn cell_index(jet: usize, btag: usize, n_jet: usize, n_btag: usize) -> Option<usize> {
    (jet < n_jet && btag < n_btag).then_some(jet * n_btag + btag)
}

fn validate_categories(what: &str, cats: &[CategoryRange]) -> Result<()> {
    if cats.is_empty() {
        return Err(Error::Validation(format!("{what} categories are empty")));
    }
    for (i, c) in cats.iter().enumerate() {
        if let Some(hi) = c.max
            && hi < c.min
        {
            return Err(Error::Validation(format!(
                "{what} category {i} has max {hi} < min {}",
                c.min
            )));
        }
        if let Some(j) = cats[..i].iter().position(|o| o.overlaps(c)) {
            return Err(Error::Validation(format!("{what} categories {j} and {i} overlap")));
        }
    }
    Ok(())
}

/// Half-open interval `[lo, hi)` over the secondary kinematic scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubBinInterval {
    /// Lower edge (inclusive).
    pub lo: f64,
    /// Upper edge (exclusive), `None` for no upper edge.
    #[serde(default)]
    pub hi: Option<f64>,
}

impl SubBinInterval {
    /// `[lo, hi)`.
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi: Some(hi) }
    }

    /// `[lo, inf)`.
    pub fn at_least(lo: f64) -> Self {
        Self { lo, hi: None }
    }

    /// Membership test (NaN is never contained).
    #[inline]
    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && self.hi.is_none_or(|hi| x < hi)
    }

    /// Axis label, e.g. `"500-800"` or `"1100+"`.
    pub fn label(&self) -> String {
        match self.hi {
            Some(hi) => format!("{}-{}", self.lo, hi),
            None => format!("{}+", self.lo),
        }
    }
}

/// Reference mj12 intervals: `[500,800)`, `[800,1100)`, `[1100,inf)`.
pub fn reference_sub_bins() -> Vec<SubBinInterval> {
    vec![
        SubBinInterval::new(500.0, 800.0),
        SubBinInterval::new(800.0, 1100.0),
        SubBinInterval::at_least(1100.0),
    ]
}

/// Intervals must be non-empty, ordered, contiguous, and only the last may be open.
pub fn validate_sub_bins(intervals: &[SubBinInterval]) -> Result<()> {
    if intervals.is_empty() {
        return Err(Error::Validation("sub-binning enabled with no intervals".into()));
    }
    for (i, iv) in intervals.iter().enumerate() {
        if !iv.lo.is_finite() {
            return Err(Error::Validation(format!("sub-bin {i} has non-finite lower edge")));
        }
        match iv.hi {
            Some(hi) if !hi.is_finite() || hi <= iv.lo => {
                return Err(Error::Validation(format!(
                    "sub-bin {i} is empty or malformed: [{}, {})",
                    iv.lo, hi
                )));
            }
            None if i + 1 != intervals.len() => {
                return Err(Error::Validation(format!(
                    "sub-bin {i} is open-ended but not the last interval (overlap)"
                )));
            }
            _ => {}
        }
        if let Some(next) = intervals.get(i + 1)
            && let Some(hi) = iv.hi
        {
            if next.lo < hi {
                return Err(Error::Validation(format!(
                    "sub-bins {i} and {} overlap ({} < {})",
                    i + 1,
                    next.lo,
                    hi
                )));
            }
            if next.lo > hi {
                return Err(Error::Validation(format!(
                    "gap between sub-bins {i} and {} ([{}, {}))",
                    i + 1,
                    hi,
                    next.lo
                )));
            }
        }
    }
    Ok(())
}

/// 0-based order-statistic positions used by the yield-sum envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeIndices {
    /// Index of the low bound in the ascending replica sums.
    pub low: usize,
    /// Index of the high bound in the ascending replica sums.
    pub high: usize,
}

impl Default for EnvelopeIndices {
    /// 16th and 84th smallest of 100 values.
    fn default() -> Self {
        Self { low: 15, high: 83 }
    }
}

fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}

/// Full pipeline configuration.
///
/// # Example
///
/// ```
/// use pv_envelope::{EnvelopeConfig, StrategyKind};
///
/// let cfg = EnvelopeConfig::reference()
///     .strategy(StrategyKind::PerEventRatio)
///     .reference_sub_binning();
/// cfg.validate().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Accumulation strategy.
    #[serde(default)]
    pub strategy: StrategyKind,
    /// Weight vector length used by both strategies (nominal included).
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Yield-sum order-statistic positions.
    #[serde(default)]
    pub envelope_indices: EnvelopeIndices,
    /// Sub-bin intervals; `None` disables sub-binning.
    #[serde(default)]
    pub sub_binning: Option<Vec<SubBinInterval>>,
    /// Bin enumeration and merge rules.
    #[serde(default)]
    pub binning: BinningConfig,
}

impl EnvelopeConfig {
    /// Reference setup: yield-sum, 100 replicas, 14 bins, no sub-binning.
    pub fn reference() -> Self {
        Self {
            strategy: StrategyKind::YieldSum,
            replicas: DEFAULT_REPLICAS,
            envelope_indices: EnvelopeIndices::default(),
            sub_binning: None,
            binning: BinningConfig::reference(),
        }
    }

    /// Set the accumulation strategy.
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the replica count.
    pub fn replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    /// Set the yield-sum order-statistic positions.
    pub fn envelope_indices(mut self, low: usize, high: usize) -> Self {
        self.envelope_indices = EnvelopeIndices { low, high };
        self
    }

    /// Enable sub-binning with the given intervals.
    pub fn sub_binning(mut self, intervals: Vec<SubBinInterval>) -> Self {
        self.sub_binning = Some(intervals);
        self
    }

    /// Enable sub-binning with the reference mj12 intervals.
    pub fn reference_sub_binning(self) -> Self {
        self.sub_binning(reference_sub_bins())
    }

    /// Replace the bin table.
    pub fn binning(mut self, binning: BinningConfig) -> Self {
        self.binning = binning;
        self
    }

    /// Fail-fast validation of everything downstream indexing relies on.
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(Error::Validation("replica count must be positive".into()));
        }
        if self.strategy == StrategyKind::YieldSum {
            let EnvelopeIndices { low, high } = self.envelope_indices;
            if low > high {
                return Err(Error::Validation(format!(
                    "envelope low index {low} is above high index {high}"
                )));
            }
            if high >= self.replicas {
                return Err(Error::Validation(format!(
                    "envelope high index {high} out of range for {} replicas",
                    self.replicas
                )));
            }
        }
        if let Some(intervals) = &self.sub_binning {
            validate_sub_bins(intervals)?;
        }
        self.binning.validate()
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self::reference()
    }
}
