//! Envelope series artifact (numbers-first).
//!
//! Without sub-binning the artifact holds one panel whose x axis is the bin
//! enumeration. With sub-binning there is one panel per bin, placed on the
//! (b-tag row, jet column) grid, whose x axis is the sub-bin labels.

use std::time::{SystemTime, UNIX_EPOCH};

use pv_core::{BinId, Error, Result};
use pv_envelope::{Curves, Envelope, EnvelopeResults, SkipStats, StrategyKind};
use serde::Serialize;

/// Schema version of [`EnvelopeArtifact`].
pub const ENVELOPE_SCHEMA_V0: &str = "pdfvar_envelope_v0";

/// Fallback y range when no event ratio is available.
const DEFAULT_Y_RANGE: [f64; 2] = [0.0, 1.0];

/// Emission options.
#[derive(Debug, Clone, Default)]
pub struct SeriesOptions {
    /// Attach the sorted per-event ratios of every point (per-event-ratio only).
    pub include_event_values: bool,
    /// Worker threads recorded in the artifact meta (0 is recorded as 1).
    pub threads: usize,
}

impl SeriesOptions {
    /// Toggle per-event ratio lists.
    pub fn include_event_values(mut self, on: bool) -> Self {
        self.include_event_values = on;
        self
    }

    /// Record the thread count.
    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }
}

/// Top-level artifact.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeArtifact {
    /// Always [`ENVELOPE_SCHEMA_V0`].
    pub schema_version: String,
    /// Provenance and run summary.
    pub meta: EnvelopeMeta,
    /// Panel arrangement.
    pub layout: PanelLayout,
    /// Grid rows (b-tag categories).
    pub grid_rows: usize,
    /// Grid columns (jet categories).
    pub grid_cols: usize,
    /// Panels in bin enumeration order.
    pub panels: Vec<EnvelopePanel>,
    /// Global y range over all event ratios (per-event-ratio only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_range: Option<[f64; 2]>,
}

/// Artifact metadata.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeMeta {
    /// Producing tool.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
    /// Creation time.
    pub created_unix_ms: u128,
    /// Accumulation strategy.
    pub strategy: StrategyKind,
    /// Replica count.
    pub replicas: usize,
    /// Accepted and skipped event counts.
    pub stats: SkipStats,
    /// Reproducibility settings.
    pub parity_mode: ParityMode,
}

/// Reproducibility settings of the run.
#[derive(Debug, Clone, Serialize)]
pub struct ParityMode {
    /// Worker threads.
    pub threads: usize,
    /// Output order is the bin enumeration order, independent of threading.
    pub stable_ordering: bool,
}

/// How panels are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelLayout {
    /// Single panel, x axis = bins.
    Bins,
    /// One panel per bin on the category grid, x axis = sub-bins.
    Grid,
}

/// One panel: aligned arrays over its x points.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopePanel {
    /// Panel title.
    pub title: String,
    /// Bin shown by this panel (grid layout only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_id: Option<BinId>,
    /// Grid row (grid layout only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_row: Option<usize>,
    /// Grid column (grid layout only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_col: Option<usize>,
    /// X axis labels.
    pub x_labels: Vec<String>,
    /// Events per point; `0` marks a point without data.
    pub n_events: Vec<u64>,
    /// Central value per point (`None` when `n_events` is 0).
    pub nominal_y: Vec<Option<f64>>,
    /// Low bound per point.
    ///
    /// JSON writes NaN and infinities as `null`, so a `null` bound on a point
    /// with `n_events > 0` is a non-finite value, flagged in `non_finite_y`.
    pub low_y: Vec<Option<f64>>,
    /// High bound per point (see `low_y` for `null`).
    pub high_y: Vec<Option<f64>>,
    /// `true` where the point has data and a bound is NaN or infinite.
    pub non_finite_y: Vec<bool>,
    /// Replica curves (yield-sum only).
    ///
    /// `replica_y[k][i]` is replica `k` at x point `i`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_y: Option<Vec<Vec<Option<f64>>>>,
    /// Sorted per-event ratios per point (per-event-ratio, opt-in).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_y: Option<Vec<Vec<f64>>>,
}

fn now_unix_ms() -> Result<u128> {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Computation(format!("system time error: {}", e)))?;
    Ok(d.as_millis())
}

fn panel(
    title: String,
    x_labels: Vec<String>,
    cells: &[Option<&Envelope>],
    results: &EnvelopeResults,
    opts: &SeriesOptions,
) -> EnvelopePanel {
    let n = cells.len();
    let mut n_events = Vec::with_capacity(n);
    let mut nominal_y = Vec::with_capacity(n);
    let mut low_y = Vec::with_capacity(n);
    let mut high_y = Vec::with_capacity(n);
    let mut non_finite_y = Vec::with_capacity(n);

    for cell in cells {
        n_events.push(cell.map_or(0, |e| e.n_events));
        nominal_y.push(cell.map(|e| e.nominal));
        low_y.push(cell.map(|e| e.low));
        high_y.push(cell.map(|e| e.high));
        non_finite_y.push(cell.is_some_and(|e| !(e.low.is_finite() && e.high.is_finite())));
    }

    let replica_y: Option<Vec<Vec<Option<f64>>>> =
        (results.strategy == StrategyKind::YieldSum).then(|| {
            (0..results.replicas)
                .map(|k| {
                    cells
                        .iter()
                        .map(|c| match c.map(|e| &e.curves) {
                            Some(Curves::Replicas(r)) => r.get(k).copied(),
                            _ => None,
                        })
                        .collect()
                })
                .collect()
        });

    let event_y: Option<Vec<Vec<f64>>> =
        (results.strategy == StrategyKind::PerEventRatio && opts.include_event_values).then(|| {
            cells
                .iter()
                .map(|c| match c.map(|e| &e.curves) {
                    Some(Curves::Events(v)) => v.clone(),
                    _ => Vec::new(),
                })
                .collect()
        });

    EnvelopePanel {
        title,
        bin_id: None,
        grid_row: None,
        grid_col: None,
        x_labels,
        n_events,
        nominal_y,
        low_y,
        high_y,
        non_finite_y,
        replica_y,
        event_y,
    }
}

/// Min/max over every finite event ratio, `[0, 1]` when there is none.
fn event_y_range(results: &EnvelopeResults) -> [f64; 2] {
    let mut range: Option<[f64; 2]> = None;
    let values = results.cells.iter().flatten().filter_map(|e| match &e.curves {
        Curves::Events(v) => Some(v),
        Curves::Replicas(_) => None,
    });
    for &v in values.flatten().filter(|v| v.is_finite()) {
        range = Some(match range {
            None => [v, v],
            Some([lo, hi]) => [lo.min(v), hi.max(v)],
        });
    }
    range.unwrap_or(DEFAULT_Y_RANGE)
}

/// Shape `results` into an [`EnvelopeArtifact`].
pub fn envelope_artifact(
    results: &EnvelopeResults,
    opts: &SeriesOptions,
) -> Result<EnvelopeArtifact> {
    let n_sub = results.n_sub();
    if results.cells.len() != results.bins.len() * n_sub {
        return Err(Error::Validation(format!(
            "cell count mismatch: {} cells for {} bins x {} sub-bins",
            results.cells.len(),
            results.bins.len(),
            n_sub
        )));
    }

    let (layout, panels) = match &results.sub_bin_labels {
        None => {
            let labels = results.bins.iter().map(|b| b.label.clone()).collect();
            let cells: Vec<Option<&Envelope>> = results.cells.iter().map(Option::as_ref).collect();
            let title = format!("PDF envelope ({})", results.strategy);
            (PanelLayout::Bins, vec![panel(title, labels, &cells, results, opts)])
        }
        Some(sub_labels) => {
            let panels = results
                .bins
                .iter()
                .enumerate()
                .map(|(i, bin)| {
                    let cells: Vec<Option<&Envelope>> =
                        results.bin_cells(i).iter().map(Option::as_ref).collect();
                    let mut p = panel(bin.label.clone(), sub_labels.clone(), &cells, results, opts);
                    p.bin_id = Some(bin.id);
                    p.grid_row = Some(bin.row);
                    p.grid_col = Some(bin.col);
                    p
                })
                .collect();
            (PanelLayout::Grid, panels)
        }
    };

    let y_range =
        (results.strategy == StrategyKind::PerEventRatio).then(|| event_y_range(results));

    let (grid_rows, grid_cols) = results.grid_shape;
    Ok(EnvelopeArtifact {
        schema_version: ENVELOPE_SCHEMA_V0.to_string(),
        meta: EnvelopeMeta {
            tool: "pdfvar".to_string(),
            tool_version: pv_core::VERSION.to_string(),
            created_unix_ms: now_unix_ms()?,
            strategy: results.strategy,
            replicas: results.replicas,
            stats: results.stats,
            parity_mode: ParityMode { threads: opts.threads.max(1), stable_ordering: true },
        },
        layout,
        grid_rows,
        grid_cols,
        panels,
        y_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_core::EventRecord;
    use pv_envelope::{EnvelopeConfig, EnvelopePipeline};

    fn run(cfg: EnvelopeConfig, events: &[EventRecord]) -> EnvelopeResults {
        EnvelopePipeline::new(cfg).unwrap().run_events(events)
    }

    #[test]
    fn test_bins_layout_yield_sum() {
        let events = [EventRecord::new(1, 6, 2, vec![10.0; 100])];
        let results = run(EnvelopeConfig::reference(), &events);
        let art = envelope_artifact(&results, &SeriesOptions::default()).unwrap();

        assert_eq!(art.schema_version, ENVELOPE_SCHEMA_V0);
        assert_eq!(art.layout, PanelLayout::Bins);
        assert_eq!((art.grid_rows, art.grid_cols), (5, 3));
        assert!(art.y_range.is_none());
        assert_eq!(art.panels.len(), 1);

        let p = &art.panels[0];
        assert_eq!(p.x_labels.len(), 14);
        assert_eq!(p.x_labels[0], "Bin 22");
        let i29 = p.x_labels.iter().position(|l| l == "Bin 29").unwrap();
        assert_eq!(p.n_events[i29], 1);
        assert_eq!(p.low_y[i29], Some(1.0));
        assert_eq!(p.high_y[i29], Some(1.0));
        assert_eq!(p.nominal_y[0], None);

        let replicas = p.replica_y.as_ref().unwrap();
        assert_eq!(replicas.len(), 100);
        assert!(replicas.iter().all(|r| r.len() == 14 && r[i29] == Some(1.0) && r[0].is_none()));
        assert!(p.event_y.is_none());
    }

    #[test]
    fn test_grid_layout_per_event_ratio() {
        let cfg = EnvelopeConfig::reference()
            .strategy(StrategyKind::PerEventRatio)
            .reference_sub_binning();
        let events = vec![
            EventRecord::new(1, 4, 0, vec![1.0; 100]).with_mj12(600.0),
            EventRecord::new(1, 4, 0, vec![2.0; 100]).with_mj12(650.0),
        ];
        let results = run(cfg, &events);
        let opts = SeriesOptions::default().include_event_values(true).threads(0);
        let art = envelope_artifact(&results, &opts).unwrap();

        assert_eq!(art.layout, PanelLayout::Grid);
        assert_eq!(art.panels.len(), 14);
        assert_eq!(art.meta.parity_mode.threads, 1);
        assert_eq!(art.y_range, Some([1.0, 1.0]));

        let p = &art.panels[0];
        assert_eq!(p.bin_id, Some(22));
        assert_eq!((p.grid_row, p.grid_col), (Some(0), Some(0)));
        assert_eq!(p.x_labels, ["500-800", "800-1100", "1100+"]);
        assert_eq!(p.n_events, [2, 0, 0]);
        assert!(p.replica_y.is_none());
        let ev = p.event_y.as_ref().unwrap();
        assert_eq!(ev[0], [1.0, 1.0]);
        assert!(ev[1].is_empty());

        // Bin 36 sits at (b-tag 4, jet 2).
        let last = art.panels.last().unwrap();
        assert_eq!((last.bin_id, last.grid_row, last.grid_col), (Some(36), Some(4), Some(2)));
    }

    #[test]
    fn test_y_range_fallback_without_data() {
        let cfg = EnvelopeConfig::reference().strategy(StrategyKind::PerEventRatio);
        let results = run(cfg, &[]);
        let art = envelope_artifact(&results, &SeriesOptions::default()).unwrap();
        assert_eq!(art.y_range, Some([0.0, 1.0]));
        assert!(art.panels[0].event_y.is_none());
        assert!(art.panels[0].nominal_y.iter().all(Option::is_none));
    }

    #[test]
    fn test_json_shape() {
        let results = run(EnvelopeConfig::reference(), &[]);
        let art = envelope_artifact(&results, &SeriesOptions::default()).unwrap();
        let v = serde_json::to_value(&art).unwrap();
        assert_eq!(v["meta"]["tool"], "pdfvar");
        assert_eq!(v["meta"]["strategy"], "yield_sum");
        assert_eq!(v["layout"], "bins");
        assert!(v["panels"][0]["low_y"][0].is_null());
        assert!(v.get("y_range").is_none());
        assert_eq!(v["panels"][0]["non_finite_y"][0], false);
    }

    #[test]
    fn test_non_finite_bounds_are_flagged() {
        let events = [EventRecord::new(1, 6, 2, vec![f64::NAN; 100])];
        let results = run(EnvelopeConfig::reference(), &events);
        let art = envelope_artifact(&results, &SeriesOptions::default()).unwrap();
        let p = &art.panels[0];
        let i29 = p.x_labels.iter().position(|l| l == "Bin 29").unwrap();
        assert_eq!(p.n_events[i29], 1);
        assert!(p.non_finite_y[i29]);
        assert_eq!(p.non_finite_y.iter().filter(|&&f| f).count(), 1);

        let v = serde_json::to_value(&art).unwrap();
        let panel = &v["panels"][0];
        assert!(panel["low_y"][i29].is_null());
        assert!(panel["high_y"][i29].is_null());
        assert_eq!(panel["nominal_y"][i29], 1.0);
        assert_eq!(panel["n_events"][i29], 1);
        assert_eq!(panel["non_finite_y"][i29], true);
        assert!(panel["low_y"][0].is_null());
        assert_eq!(panel["non_finite_y"][0], false);
    }
}
