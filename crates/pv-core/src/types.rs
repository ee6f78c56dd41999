//! Common data types for pdfvar

use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of an analysis bin (e.g. `22` .. `36` in the reference table).
pub type BinId = i32;

/// One event as delivered by an [`EventSource`](crate::EventSource).
///
/// `weight[0]` is the nominal weight, `weight[1..]` are the replica weights.
/// An empty vector stands for a missing weight branch entry. On input, a
/// `null` vector or one holding any `null` element is read as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Lepton multiplicity.
    pub nleps: i32,
    /// Jet multiplicity.
    pub njets: i32,
    /// b-tagged jet multiplicity.
    pub nbm: i32,
    /// Secondary kinematic scalar used for sub-binning, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mj12: Option<f64>,
    /// Nominal weight followed by replica weights.
    #[serde(default, deserialize_with = "weights_or_empty")]
    pub weight: Vec<f64>,
}

fn weights_or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<f64>, D::Error> {
    let raw: Option<Vec<Option<f64>>> = Option::deserialize(d)?;
    Ok(raw.and_then(|w| w.into_iter().collect::<Option<Vec<f64>>>()).unwrap_or_default())
}

impl EventRecord {
    /// Create an event without a secondary scalar.
    pub fn new(nleps: i32, njets: i32, nbm: i32, weight: Vec<f64>) -> Self {
        Self { nleps, njets, nbm, mj12: None, weight }
    }

    /// Attach the secondary kinematic scalar.
    pub fn with_mj12(mut self, mj12: f64) -> Self {
        self.mj12 = Some(mj12);
        self
    }

    /// Nominal weight (`weight[0]`), `None` when the vector is empty.
    pub fn nominal_weight(&self) -> Option<f64> {
        self.weight.first().copied()
    }
}
