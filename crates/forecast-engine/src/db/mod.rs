use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

mod query;
mod schema;

pub use query::{
    CaseSource, RunCaseRow, active_case_page, automated_samples, case_exists, case_sources,
    linked_case_ids, manual_samples, not_completed_runs, run_cases_for_run, run_ids_for_cases,
    update_case_forecasts, update_run_forecast,
};
pub use schema::init_sqlite;

/// Handle to the SQLite database. Cheap to clone; every operation opens a
/// short-lived connection so concurrent jobs never share connection state.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.path).map_err(|error| format!("open sqlite: {error}"))
    }
}

pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
