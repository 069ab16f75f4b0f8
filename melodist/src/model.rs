// Predictive sequence models: optional, soft guidance for pitch choice.
//
// A `SequenceModel` looks at the recent scale-degree history of a voice and
// returns one additive log-space bias per scale degree (index 0 = tonic).
// Zero is neutral, so `NullModel` (which returns nothing) contributes no bias
// and the weighting engine never has to branch on whether a model is present.
//
// `DegreeMarkovModel` is the built-in implementation: a Katz-style backoff
// from order 3 down to order 0 over scale-degree *steps*, loaded from JSON
// exported by an offline corpus pass. Its probabilities are turned into
// biases relative to a uniform choice, `ln(p * degrees)`, floored so an
// unseen step is discouraged rather than forbidden.

use crate::error::{GenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

/// Scores the next scale degree of a voice.
pub trait SequenceModel: Debug + Send + Sync {
    /// `history` holds absolute scale indices (octave * degrees + degree),
    /// oldest first. Returns a log-space bias per degree; missing entries and
    /// non-finite values count as zero.
    fn predict(&self, history: &[i32]) -> Vec<f64>;
}

/// The absent model: contributes no bias.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullModel;

impl SequenceModel for NullModel {
    fn predict(&self, _history: &[i32]) -> Vec<f64> {
        Vec::new()
    }
}

/// Next-step weights, keyed by scale-degree step.
type StepTable = BTreeMap<i32, f64>;

/// Lowest probability the bias conversion will take the log of.
const PROBABILITY_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeMarkovModel {
    /// Number of degrees in the scales this model was trained on.
    #[serde(default = "default_degrees")]
    pub degrees: usize,
    /// Contexts are comma-joined step sequences, e.g. `"1,1,-2"`.
    #[serde(default)]
    pub order3: BTreeMap<String, StepTable>,
    #[serde(default)]
    pub order2: BTreeMap<String, StepTable>,
    #[serde(default)]
    pub order1: BTreeMap<String, StepTable>,
    pub order0: StepTable,
}

fn default_degrees() -> usize {
    7
}

impl DegreeMarkovModel {
    /// Stepwise-dominant defaults for a seven-note scale.
    pub fn default_model() -> Self {
        let order0 = [
            (0, 1.0),
            (1, 3.0),
            (-1, 3.0),
            (2, 1.5),
            (-2, 1.5),
            (3, 0.5),
            (-3, 0.5),
        ]
        .into_iter()
        .collect();
        DegreeMarkovModel {
            degrees: 7,
            order3: BTreeMap::new(),
            order2: BTreeMap::new(),
            order1: BTreeMap::new(),
            order0,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let model: DegreeMarkovModel = serde_json::from_str(json)?;
        if model.degrees == 0 {
            return Err(GenError::config("sequence model must cover at least one degree"));
        }
        let tables = model
            .order3
            .values()
            .chain(model.order2.values())
            .chain(model.order1.values())
            .chain(std::iter::once(&model.order0));
        for table in tables {
            if table.values().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(GenError::config(
                    "sequence model weights must be finite and non-negative",
                ));
            }
        }
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// The highest-order non-empty table matching the tail of `steps`.
    fn table_for(&self, steps: &[i32]) -> &StepTable {
        let orders = [(3, &self.order3), (2, &self.order2), (1, &self.order1)];
        for (order, tables) in orders {
            if steps.len() < order {
                continue;
            }
            let key = context_key(&steps[steps.len() - order..]);
            if let Some(table) = tables.get(&key)
                && table.values().sum::<f64>() > 0.0
            {
                return table;
            }
        }
        &self.order0
    }
}

impl SequenceModel for DegreeMarkovModel {
    fn predict(&self, history: &[i32]) -> Vec<f64> {
        let Some(&last) = history.last() else {
            return Vec::new();
        };
        let steps: Vec<i32> = history.windows(2).map(|w| w[1] - w[0]).collect();
        let table = self.table_for(&steps);
        let total: f64 = table.values().sum();
        if total <= 0.0 {
            return Vec::new();
        }
        let n = self.degrees as i32;
        let last_degree = last.rem_euclid(n);
        (0..n)
            .map(|degree| {
                // Nearest step that lands on this degree.
                let mut step = (degree - last_degree).rem_euclid(n);
                if step > n / 2 {
                    step -= n;
                }
                let p = table.get(&step).copied().unwrap_or(0.0) / total;
                (p.max(PROBABILITY_FLOOR) * n as f64).ln()
            })
            .collect()
    }
}

fn context_key(steps: &[i32]) -> String {
    steps
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
