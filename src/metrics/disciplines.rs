//! Force-plate disciplines and their metric extraction strategies.
//!
//! Each discipline is bound to exactly one strategy table at compile time.
//! A strategy lists the scalar metrics it keeps, the provider result code
//! each one comes from, and how multiple trials reduce into one value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::integrations::forcedecks::TrialRecord;

/// Standard gravity, used to convert body mass into body weight force.
pub const GRAVITY: f64 = 9.81;

/// Kilograms to pounds.
pub const KG_TO_LB: f64 = 2.20462;

/// Canonical metric names.
pub mod metric_names {
    pub const PEAK_TAKEOFF_POWER: &str = "peak_takeoff_power";
    pub const BODYMASS_RELATIVE_TAKEOFF_POWER: &str = "bodymass_relative_takeoff_power";
    pub const JUMP_HEIGHT: &str = "jump_height";
    pub const PEAK_TAKEOFF_FORCE: &str = "peak_takeoff_force";
    pub const RSI_MODIFIED: &str = "rsi_modified";
    pub const BODY_WEIGHT: &str = "body_weight";
    pub const HOP_MEAN_RSI: &str = "hop_mean_rsi";
    pub const HOP_BEST_RSI: &str = "hop_best_rsi";
    pub const HOP_BEST_JUMP_HEIGHT: &str = "hop_best_jump_height";
    pub const PUSHUP_HEIGHT: &str = "pushup_height";
    pub const PEAK_VERTICAL_FORCE: &str = "peak_vertical_force";
    pub const FORCE_AT_100MS: &str = "force_at_100ms";
    pub const NET_PEAK_VERTICAL_FORCE: &str = "net_peak_vertical_force";
    pub const RELATIVE_STRENGTH: &str = "relative_strength";
}

use metric_names::*;

/// The five force-plate test types. Serialized as provider codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Discipline {
    #[serde(rename = "CMJ")]
    CounterMovementJump,
    #[serde(rename = "SJ")]
    SquatJump,
    #[serde(rename = "HJ")]
    HopJump,
    #[serde(rename = "PPU")]
    ProneTakeoffPull,
    #[serde(rename = "IMTP")]
    IsometricMidThighPull,
}

impl Discipline {
    pub const ALL: [Discipline; 5] = [
        Discipline::CounterMovementJump,
        Discipline::SquatJump,
        Discipline::HopJump,
        Discipline::ProneTakeoffPull,
        Discipline::IsometricMidThighPull,
    ];

    /// Disciplines averaged into the force profile composite. CMJ is left
    /// out by product definition.
    pub const FORCE_PROFILE: [Discipline; 4] = [
        Discipline::SquatJump,
        Discipline::HopJump,
        Discipline::ProneTakeoffPull,
        Discipline::IsometricMidThighPull,
    ];

    /// Provider test type code.
    pub fn code(&self) -> &'static str {
        match self {
            Discipline::CounterMovementJump => "CMJ",
            Discipline::SquatJump => "SJ",
            Discipline::HopJump => "HJ",
            Discipline::ProneTakeoffPull => "PPU",
            Discipline::IsometricMidThighPull => "IMTP",
        }
    }

    /// Parse a provider test type code. Unknown codes return `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.code().eq_ignore_ascii_case(code.trim()))
    }

    /// Get display name
    pub fn display_name(&self) -> &'static str {
        match self {
            Discipline::CounterMovementJump => "Countermovement Jump",
            Discipline::SquatJump => "Squat Jump",
            Discipline::HopJump => "Hop Jump",
            Discipline::ProneTakeoffPull => "Plyo Push-Up",
            Discipline::IsometricMidThighPull => "Isometric Mid-Thigh Pull",
        }
    }

    /// Table holding this discipline's stored tests.
    pub fn table_name(&self) -> &'static str {
        match self {
            Discipline::CounterMovementJump => "cmj_tests",
            Discipline::SquatJump => "sj_tests",
            Discipline::HopJump => "hj_tests",
            Discipline::ProneTakeoffPull => "ppu_tests",
            Discipline::IsometricMidThighPull => "imtp_tests",
        }
    }

    /// Whether this discipline feeds the force profile composite.
    pub fn in_force_profile(&self) -> bool {
        Self::FORCE_PROFILE.contains(self)
    }

    /// The extraction strategy bound to this discipline.
    pub fn strategy(&self) -> &'static ExtractionStrategy {
        match self {
            Discipline::CounterMovementJump => &CMJ_STRATEGY,
            Discipline::SquatJump => &SJ_STRATEGY,
            Discipline::HopJump => &HJ_STRATEGY,
            Discipline::ProneTakeoffPull => &PPU_STRATEGY,
            Discipline::IsometricMidThighPull => &IMTP_STRATEGY,
        }
    }

    /// Metrics that get percentile-ranked.
    pub fn tracked_metrics(&self) -> &'static [&'static str] {
        self.strategy().tracked
    }
}

impl std::fmt::Display for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// How several trials collapse into one stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Best of trials (largest value)
    Max,
    /// Arithmetic mean of trials
    Mean,
    /// Value from the latest recorded trial
    Last,
}

impl Reduction {
    /// Reduce values given in trial order (oldest first).
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            Reduction::Max => values.iter().copied().reduce(f64::max),
            Reduction::Mean => {
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            Reduction::Last => values.last().copied(),
        }
    }
}

/// One extracted metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    /// Canonical metric name
    pub name: &'static str,
    /// Provider result code
    pub source: &'static str,
    /// Unit of the stored value
    pub unit: &'static str,
    pub reduction: Reduction,
}

impl MetricSpec {
    const fn new(name: &'static str, source: &'static str, unit: &'static str, reduction: Reduction) -> Self {
        Self {
            name,
            source,
            unit,
            reduction,
        }
    }
}

/// Per-discipline extraction rules.
pub struct ExtractionStrategy {
    /// Metrics read straight from trial results
    pub metrics: &'static [MetricSpec],
    /// Metrics percentile-ranked against the reference population
    pub tracked: &'static [&'static str],
    /// Post-processing for metrics computed from other metrics
    derive: fn(&mut MetricSet),
}

impl ExtractionStrategy {
    /// Reduce a trial list into this discipline's canonical metric set.
    ///
    /// Trials are ordered by capture time first so `Reduction::Last` picks
    /// the latest trial regardless of payload order.
    pub fn extract(&self, trials: &[TrialRecord]) -> MetricSet {
        let mut ordered: Vec<&TrialRecord> = trials.iter().collect();
        ordered.sort_by_key(|t| t.recorded_at);

        let mut metrics = MetricSet::default();
        for spec in self.metrics {
            let values: Vec<f64> = ordered
                .iter()
                .filter_map(|trial| {
                    trial
                        .results
                        .iter()
                        .filter(|r| r.is_whole_trial())
                        .find(|r| r.code().eq_ignore_ascii_case(spec.source))
                        .and_then(|r| r.as_f64())
                })
                .collect();

            if let Some(value) = spec.reduction.apply(&values) {
                metrics.insert(spec.name, value);
            }
        }

        (self.derive)(&mut metrics);
        metrics
    }
}

fn no_derivation(_: &mut MetricSet) {}

/// Net peak force and relative strength, both relative to body weight force.
fn derive_imtp(metrics: &mut MetricSet) {
    let (Some(peak), Some(mass_kg)) = (metrics.get(PEAK_VERTICAL_FORCE), metrics.get(BODY_WEIGHT))
    else {
        return;
    };
    if mass_kg <= 0.0 {
        return;
    }

    let body_weight_n = mass_kg * GRAVITY;
    let net = peak - body_weight_n;
    metrics.insert(NET_PEAK_VERTICAL_FORCE, net);
    metrics.insert(RELATIVE_STRENGTH, net / body_weight_n);
}

static CMJ_STRATEGY: ExtractionStrategy = ExtractionStrategy {
    metrics: &[
        MetricSpec::new(PEAK_TAKEOFF_POWER, "PEAK_TAKEOFF_POWER", "W", Reduction::Max),
        MetricSpec::new(
            BODYMASS_RELATIVE_TAKEOFF_POWER,
            "BODYMASS_RELATIVE_TAKEOFF_POWER",
            "W/kg",
            Reduction::Max,
        ),
        MetricSpec::new(JUMP_HEIGHT, "JUMP_HEIGHT", "cm", Reduction::Max),
        MetricSpec::new(PEAK_TAKEOFF_FORCE, "PEAK_TAKEOFF_FORCE", "N", Reduction::Max),
        MetricSpec::new(RSI_MODIFIED, "RSI_MODIFIED", "m/s", Reduction::Max),
        MetricSpec::new(BODY_WEIGHT, "BODY_WEIGHT", "kg", Reduction::Last),
    ],
    tracked: &[PEAK_TAKEOFF_POWER, BODYMASS_RELATIVE_TAKEOFF_POWER],
    derive: no_derivation,
};

static SJ_STRATEGY: ExtractionStrategy = ExtractionStrategy {
    metrics: &[
        MetricSpec::new(PEAK_TAKEOFF_POWER, "PEAK_TAKEOFF_POWER", "W", Reduction::Max),
        MetricSpec::new(
            BODYMASS_RELATIVE_TAKEOFF_POWER,
            "BODYMASS_RELATIVE_TAKEOFF_POWER",
            "W/kg",
            Reduction::Max,
        ),
        MetricSpec::new(JUMP_HEIGHT, "JUMP_HEIGHT", "cm", Reduction::Max),
        MetricSpec::new(PEAK_TAKEOFF_FORCE, "PEAK_TAKEOFF_FORCE", "N", Reduction::Max),
        MetricSpec::new(BODY_WEIGHT, "BODY_WEIGHT", "kg", Reduction::Last),
    ],
    tracked: &[PEAK_TAKEOFF_POWER, BODYMASS_RELATIVE_TAKEOFF_POWER],
    derive: no_derivation,
};

static HJ_STRATEGY: ExtractionStrategy = ExtractionStrategy {
    metrics: &[
        MetricSpec::new(HOP_MEAN_RSI, "HOP_MEAN_RSI", "", Reduction::Mean),
        MetricSpec::new(HOP_BEST_RSI, "HOP_BEST_RSI", "", Reduction::Max),
        MetricSpec::new(HOP_BEST_JUMP_HEIGHT, "HOP_BEST_JUMP_HEIGHT", "cm", Reduction::Max),
    ],
    tracked: &[HOP_MEAN_RSI],
    derive: no_derivation,
};

static PPU_STRATEGY: ExtractionStrategy = ExtractionStrategy {
    metrics: &[
        MetricSpec::new(PEAK_TAKEOFF_FORCE, "PEAK_TAKEOFF_FORCE", "N", Reduction::Max),
        MetricSpec::new(PUSHUP_HEIGHT, "PUSHUP_HEIGHT", "cm", Reduction::Max),
        MetricSpec::new(PEAK_TAKEOFF_POWER, "PEAK_TAKEOFF_POWER", "W", Reduction::Max),
    ],
    tracked: &[PEAK_TAKEOFF_FORCE],
    derive: no_derivation,
};

static IMTP_STRATEGY: ExtractionStrategy = ExtractionStrategy {
    metrics: &[
        MetricSpec::new(PEAK_VERTICAL_FORCE, "PEAK_VERTICAL_FORCE", "N", Reduction::Max),
        MetricSpec::new(FORCE_AT_100MS, "FORCE_AT_100MS", "N", Reduction::Max),
        MetricSpec::new(BODY_WEIGHT, "BODY_WEIGHT", "kg", Reduction::Last),
    ],
    tracked: &[NET_PEAK_VERTICAL_FORCE, RELATIVE_STRENGTH],
    derive: derive_imtp,
};

/// Canonical scalar metrics of one test, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<String, f64>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Body mass in kilograms, when the test recorded one.
    pub fn body_weight_kg(&self) -> Option<f64> {
        self.get(BODY_WEIGHT)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for MetricSet {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Convert kilograms to pounds rounded to one decimal.
pub fn kg_to_lb_rounded(kg: f64) -> f64 {
    (kg * KG_TO_LB * 10.0).round() / 10.0
}
