//! Event → (bin, sub-bin) classification.

use pv_core::{BinId, Result};
use serde::Serialize;

use crate::config::{BinningConfig, CategoryRange, SubBinInterval, cell_index, validate_sub_bins};

/// Why an event could not be assigned to a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unclassifiable {
    /// Lepton multiplicity differs from the selected channel.
    LeptonCount,
    /// Jet multiplicity falls in no jet category.
    JetCount,
    /// B-tag multiplicity falls in no b-tag category.
    BtagCount,
    /// The (jet, b-tag) cell maps to no enumerated bin.
    NotEnumerated,
}

/// Static description of one enumerated bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinInfo {
    /// Bin identifier.
    pub id: BinId,
    /// Display label (`"Bin <id>"`).
    pub label: String,
    /// Grid row (b-tag category).
    pub row: usize,
    /// Grid column (jet category).
    pub col: usize,
}

/// Compiled form of a [`BinningConfig`].
///
/// Lookups go through a dense (jet category x b-tag category) table, so
/// merges and skipped ids cost nothing at classification time.
#[derive(Debug, Clone)]
pub struct BinClassifier {
    lepton_count: i32,
    jet_categories: Vec<CategoryRange>,
    btag_categories: Vec<CategoryRange>,
    cells: Vec<Option<usize>>,
    bins: Vec<BinInfo>,
}

impl BinClassifier {
    /// Validate `cfg` and build the lookup table.
    pub fn new(cfg: &BinningConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self::compile(cfg))
    }

    /// Classifier for [`BinningConfig::reference`].
    pub fn reference() -> Self {
        Self::compile(&BinningConfig::reference())
    }

    fn compile(cfg: &BinningConfig) -> Self {
        let n_jet = cfg.jet_categories.len();
        let n_btag = cfg.btag_categories.len();
        let mut cells = vec![None; n_jet * n_btag];

        for (idx, b) in cfg.bins.iter().enumerate() {
            if let Some(c) = cell_index(b.jet, b.btag, n_jet, n_btag) {
                cells[c] = Some(idx);
            }
        }
        for m in &cfg.merges {
            if let Some(c) = cell_index(m.jet, m.btag, n_jet, n_btag) {
                cells[c] = cfg.bins.iter().position(|b| b.id == m.into);
            }
        }

        let bins = cfg
            .bins
            .iter()
            .map(|b| BinInfo { id: b.id, label: format!("Bin {}", b.id), row: b.btag, col: b.jet })
            .collect();

        Self {
            lepton_count: cfg.lepton_count,
            jet_categories: cfg.jet_categories.clone(),
            btag_categories: cfg.btag_categories.clone(),
            cells,
            bins,
        }
    }

    /// Bin id for an event, `None` when unclassifiable.
    pub fn classify(&self, nleps: i32, njets: i32, nbm: i32) -> Option<BinId> {
        self.locate(nleps, njets, nbm).ok().map(|idx| self.bins[idx].id)
    }

    /// Position of the event's bin in the enumeration.
    pub fn locate(
        &self,
        nleps: i32,
        njets: i32,
        nbm: i32,
    ) -> std::result::Result<usize, Unclassifiable> {
        if nleps != self.lepton_count {
            return Err(Unclassifiable::LeptonCount);
        }
        let jet = self
            .jet_categories
            .iter()
            .position(|c| c.contains(njets))
            .ok_or(Unclassifiable::JetCount)?;
        let btag = self
            .btag_categories
            .iter()
            .position(|c| c.contains(nbm))
            .ok_or(Unclassifiable::BtagCount)?;
        self.cells[jet * self.btag_categories.len() + btag].ok_or(Unclassifiable::NotEnumerated)
    }

    /// Enumeration position of a bin id.
    pub fn index_of(&self, id: BinId) -> Option<usize> {
        self.bins.iter().position(|b| b.id == id)
    }

    /// Enumerated bins in output order.
    pub fn bins(&self) -> &[BinInfo] {
        &self.bins
    }

    /// Number of enumerated bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Always `false` for a validated table.
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Panel grid shape `(rows, cols)` = (b-tag categories, jet categories).
    pub fn grid_shape(&self) -> (usize, usize) {
        (self.btag_categories.len(), self.jet_categories.len())
    }
}

/// Sub-bin lookup over the secondary kinematic scalar.
#[derive(Debug, Clone)]
pub struct SubBinner {
    intervals: Vec<SubBinInterval>,
}

impl SubBinner {
    /// Validate the intervals and build the lookup.
    pub fn new(intervals: Vec<SubBinInterval>) -> Result<Self> {
        validate_sub_bins(&intervals)?;
        Ok(Self { intervals })
    }

    /// Sub-bin index for `x`; values below the first edge (and NaN) are unclassifiable.
    pub fn sub_bin(&self, x: f64) -> Option<usize> {
        self.intervals.iter().position(|iv| iv.contains(x))
    }

    /// Axis labels in interval order.
    pub fn labels(&self) -> Vec<String> {
        self.intervals.iter().map(SubBinInterval::label).collect()
    }

    /// Number of sub-bins.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Always `false` for a validated binner.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}
