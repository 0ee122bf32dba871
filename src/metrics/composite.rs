//! Composite scores built from percentile history.
//!
//! Both composites are pure functions of persisted history rows:
//! - Rolling: every discipline whose latest test falls inside a short window
//!   ending at the athlete's newest test.
//! - Force profile: SJ, HJ, PPU and IMTP only, no window. It can also be
//!   read per test date, using only that date's tests.
//!
//! A discipline's score is the mean of the tracked-metric percentiles of its
//! most recent test. Missing disciplines shrink the average instead of
//! failing it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::disciplines::Discipline;
use super::percentile::PercentileHistoryEntry;

/// Which composite a score describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeKind {
    Rolling,
    ForceProfile,
}

impl CompositeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeKind::Rolling => "rolling",
            CompositeKind::ForceProfile => "force_profile",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "rolling" => Some(CompositeKind::Rolling),
            "force_profile" => Some(CompositeKind::ForceProfile),
            _ => None,
        }
    }
}

/// Score of one discipline's most recent test.
#[derive(Debug, Clone, PartialEq)]
pub struct DisciplineScore {
    pub discipline: Discipline,
    pub provider_test_id: String,
    pub test_date: DateTime<Utc>,
    pub cohort: Option<f64>,
    pub overall: Option<f64>,
}

/// An averaged composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub kind: CompositeKind,
    /// Mean of discipline cohort percentiles
    pub cohort: Option<f64>,
    /// Mean of discipline overall percentiles
    pub overall: Option<f64>,
    /// Disciplines that contributed
    pub disciplines: Vec<Discipline>,
}

/// Force profile composite for a single calendar date (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedComposite {
    pub date: NaiveDate,
    pub score: CompositeScore,
}

impl CompositeScore {
    /// Value shown on the athlete record: the cohort score, or the overall
    /// score when no cohort population existed.
    pub fn headline(&self) -> Option<f64> {
        self.cohort.or(self.overall)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Keep only the authoritative row per (discipline, test, metric).
///
/// Rows are expected in write order; on a `computed_at` tie the later row
/// wins.
pub fn authoritative_entries(entries: &[PercentileHistoryEntry]) -> Vec<&PercentileHistoryEntry> {
    let mut latest: HashMap<(Discipline, &str, &str), &PercentileHistoryEntry> = HashMap::new();

    for entry in entries {
        let key = (
            entry.discipline,
            entry.provider_test_id.as_str(),
            entry.metric.as_str(),
        );
        match latest.get(&key) {
            Some(existing) if existing.computed_at > entry.computed_at => {}
            _ => {
                latest.insert(key, entry);
            }
        }
    }

    latest.into_values().collect()
}

/// Score of each discipline's most recent test.
///
/// Disciplines whose latest test has no available percentile at all are
/// left out.
pub fn latest_discipline_scores(
    entries: &[PercentileHistoryEntry],
) -> BTreeMap<Discipline, DisciplineScore> {
    // (discipline, test) -> rows of that test
    let mut by_test: HashMap<(Discipline, &str), Vec<&PercentileHistoryEntry>> = HashMap::new();
    for entry in authoritative_entries(entries) {
        by_test
            .entry((entry.discipline, entry.provider_test_id.as_str()))
            .or_default()
            .push(entry);
    }

    // Most recent test per discipline, ordered by test date then write time.
    let mut newest: HashMap<Discipline, (DateTime<Utc>, DateTime<Utc>, &str)> = HashMap::new();
    for ((discipline, test_id), rows) in &by_test {
        let test_date = rows.iter().map(|r| r.test_date).max();
        let computed_at = rows.iter().map(|r| r.computed_at).max();
        let (Some(test_date), Some(computed_at)) = (test_date, computed_at) else {
            continue;
        };
        let candidate = (test_date, computed_at, *test_id);
        match newest.get(discipline) {
            Some(current) if (current.0, current.1) >= (candidate.0, candidate.1) => {}
            _ => {
                newest.insert(*discipline, candidate);
            }
        }
    }

    let mut scores = BTreeMap::new();
    for (discipline, (test_date, _, test_id)) in newest {
        let Some(rows) = by_test.get(&(discipline, test_id)) else {
            continue;
        };
        let cohort = mean(rows.iter().filter_map(|r| r.percentile_cohort));
        let overall = mean(rows.iter().filter_map(|r| r.percentile_overall));
        if cohort.is_none() && overall.is_none() {
            continue;
        }

        scores.insert(
            discipline,
            DisciplineScore {
                discipline,
                provider_test_id: test_id.to_string(),
                test_date,
                cohort,
                overall,
            },
        );
    }

    scores
}

fn average_scores<'a>(
    kind: CompositeKind,
    scores: impl Iterator<Item = &'a DisciplineScore> + Clone,
) -> Option<CompositeScore> {
    let cohort = mean(scores.clone().filter_map(|s| s.cohort));
    let overall = mean(scores.clone().filter_map(|s| s.overall));
    if cohort.is_none() && overall.is_none() {
        return None;
    }

    Some(CompositeScore {
        kind,
        cohort,
        overall,
        disciplines: scores.map(|s| s.discipline).collect(),
    })
}

/// Short-horizon composite across all five disciplines.
///
/// Only disciplines whose latest test was recorded within `window_days` of
/// the athlete's newest scored test take part.
pub fn rolling_composite(
    entries: &[PercentileHistoryEntry],
    window_days: i64,
) -> Option<CompositeScore> {
    let scores = latest_discipline_scores(entries);
    let newest = scores.values().map(|s| s.test_date).max()?;
    // A window reaching past the representable range keeps everything.
    let cutoff = Duration::try_days(window_days.max(0))
        .and_then(|window| newest.checked_sub_signed(window));

    average_scores(
        CompositeKind::Rolling,
        scores
            .values()
            .filter(|s| cutoff.map_or(true, |cutoff| s.test_date >= cutoff)),
    )
}

/// Force profile composite over SJ, HJ, PPU and IMTP. CMJ never counts.
pub fn force_profile_composite(entries: &[PercentileHistoryEntry]) -> Option<CompositeScore> {
    let scores = latest_discipline_scores(entries);

    average_scores(
        CompositeKind::ForceProfile,
        scores.values().filter(|s| s.discipline.in_force_profile()),
    )
}

/// Force profile composite per distinct test date, oldest first.
///
/// Each date only sees the tests recorded on it. Dates without any available
/// percentile are skipped.
pub fn force_profiles_by_date(entries: &[PercentileHistoryEntry]) -> Vec<DatedComposite> {
    let mut by_date: BTreeMap<NaiveDate, Vec<PercentileHistoryEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.discipline.in_force_profile()) {
        by_date
            .entry(entry.test_date.date_naive())
            .or_default()
            .push(entry.clone());
    }

    by_date
        .into_iter()
        .filter_map(|(date, rows)| {
            force_profile_composite(&rows).map(|score| DatedComposite { date, score })
        })
        .collect()
}
