//! Database schema definitions for force-plate sync.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Athletes table (denormalized sync fields live here)
CREATE TABLE IF NOT EXISTS athletes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    cohort TEXT,
    external_id TEXT UNIQUE,
    pending_link_id TEXT,
    last_synced_at TEXT,
    bodyweight_lb REAL,
    composite_score REAL,
    force_profile_composite REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Discipline tables: one row per (provider test, athlete)
CREATE TABLE IF NOT EXISTS cmj_tests (
    provider_test_id TEXT NOT NULL,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    trial_count INTEGER NOT NULL,
    body_weight_kg REAL,
    metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (provider_test_id, athlete_id)
);

CREATE INDEX IF NOT EXISTS idx_cmj_tests_athlete ON cmj_tests(athlete_id, recorded_at);

CREATE TABLE IF NOT EXISTS sj_tests (
    provider_test_id TEXT NOT NULL,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    trial_count INTEGER NOT NULL,
    body_weight_kg REAL,
    metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (provider_test_id, athlete_id)
);

CREATE INDEX IF NOT EXISTS idx_sj_tests_athlete ON sj_tests(athlete_id, recorded_at);

CREATE TABLE IF NOT EXISTS hj_tests (
    provider_test_id TEXT NOT NULL,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    trial_count INTEGER NOT NULL,
    body_weight_kg REAL,
    metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (provider_test_id, athlete_id)
);

CREATE INDEX IF NOT EXISTS idx_hj_tests_athlete ON hj_tests(athlete_id, recorded_at);

CREATE TABLE IF NOT EXISTS ppu_tests (
    provider_test_id TEXT NOT NULL,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    trial_count INTEGER NOT NULL,
    body_weight_kg REAL,
    metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (provider_test_id, athlete_id)
);

CREATE INDEX IF NOT EXISTS idx_ppu_tests_athlete ON ppu_tests(athlete_id, recorded_at);

CREATE TABLE IF NOT EXISTS imtp_tests (
    provider_test_id TEXT NOT NULL,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    trial_count INTEGER NOT NULL,
    body_weight_kg REAL,
    metrics_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (provider_test_id, athlete_id)
);

CREATE INDEX IF NOT EXISTS idx_imtp_tests_athlete ON imtp_tests(athlete_id, recorded_at);

-- Append-only percentile history (never updated in place)
CREATE TABLE IF NOT EXISTS percentile_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    discipline TEXT NOT NULL,
    provider_test_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL,
    cohort TEXT NOT NULL,
    percentile_cohort REAL,
    percentile_overall REAL,
    test_date TEXT NOT NULL,
    computed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_percentile_history_athlete ON percentile_history(athlete_id, discipline);
CREATE INDEX IF NOT EXISTS idx_percentile_history_test ON percentile_history(athlete_id, provider_test_id, metric);

-- Athlete values feeding the shared reference populations
CREATE TABLE IF NOT EXISTS cohort_contributions (
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    discipline TEXT NOT NULL,
    metric TEXT NOT NULL,
    cohort TEXT NOT NULL,
    provider_test_id TEXT NOT NULL,
    value REAL NOT NULL,
    test_date TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (athlete_id, discipline, metric)
);

CREATE INDEX IF NOT EXISTS idx_cohort_contributions_population ON cohort_contributions(discipline, metric, cohort);

-- Seeded normative samples
CREATE TABLE IF NOT EXISTS reference_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    discipline TEXT NOT NULL,
    metric TEXT NOT NULL,
    cohort TEXT NOT NULL,
    value REAL NOT NULL,
    source TEXT
);

CREATE INDEX IF NOT EXISTS idx_reference_samples_population ON reference_samples(discipline, metric, cohort);

-- Append-only composite snapshots
CREATE TABLE IF NOT EXISTS composite_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    athlete_id TEXT NOT NULL REFERENCES athletes(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    cohort TEXT NOT NULL,
    score_cohort REAL,
    score_overall REAL,
    disciplines TEXT NOT NULL,
    computed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_composite_history_athlete ON composite_history(athlete_id, kind);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;
