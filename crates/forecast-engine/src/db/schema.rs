use crate::db::Db;

/// Schema for the domain tables the engine reads, the forecast columns it
/// overwrites, and the persistent job queue it owns. Domain rows are created
/// by the surrounding application; the engine only updates forecast columns.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS cases (
    case_id            INTEGER PRIMARY KEY,
    source             TEXT NOT NULL,
    is_deleted         INTEGER NOT NULL DEFAULT 0,
    is_archived        INTEGER NOT NULL DEFAULT 0,
    forecast_manual    INTEGER,
    forecast_automated REAL
);

CREATE TABLE IF NOT EXISTS case_links (
    link_id      INTEGER PRIMARY KEY,
    from_case_id INTEGER NOT NULL,
    to_case_id   INTEGER NOT NULL,
    link_kind    TEXT NOT NULL,
    is_deleted   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_case_links_from ON case_links (from_case_id, link_kind);
CREATE INDEX IF NOT EXISTS idx_case_links_to ON case_links (to_case_id, link_kind);

CREATE TABLE IF NOT EXISTS runs (
    run_id             INTEGER PRIMARY KEY,
    is_completed       INTEGER NOT NULL DEFAULT 0,
    forecast_manual    INTEGER,
    forecast_automated REAL
);

CREATE TABLE IF NOT EXISTS run_cases (
    run_case_id INTEGER PRIMARY KEY,
    run_id      INTEGER NOT NULL,
    case_id     INTEGER NOT NULL,
    status      INTEGER
);
CREATE INDEX IF NOT EXISTS idx_run_cases_run ON run_cases (run_id);
CREATE INDEX IF NOT EXISTS idx_run_cases_case ON run_cases (case_id);

CREATE TABLE IF NOT EXISTS manual_results (
    result_id    INTEGER PRIMARY KEY,
    run_case_id  INTEGER NOT NULL,
    elapsed_secs INTEGER,
    is_deleted   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_manual_results_run_case ON manual_results (run_case_id);

CREATE TABLE IF NOT EXISTS automated_results (
    import_id    INTEGER PRIMARY KEY,
    case_id      INTEGER NOT NULL,
    elapsed_secs REAL,
    is_deleted   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_automated_results_case ON automated_results (case_id);

CREATE TABLE IF NOT EXISTS jobs (
    job_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    kind           TEXT NOT NULL,
    payload_json   TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'queued',
    attempts       INTEGER NOT NULL DEFAULT 0,
    error          TEXT,
    report_json    TEXT,
    enqueued_at_ns INTEGER NOT NULL,
    started_at_ns  INTEGER,
    finished_at_ns INTEGER
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status, job_id);
";

pub fn init_sqlite(db: &Db) -> Result<(), String> {
    let conn = db.open()?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|error| format!("set journal_mode: {error}"))?;
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|error| format!("init schema: {error}"))?;
    Ok(())
}
