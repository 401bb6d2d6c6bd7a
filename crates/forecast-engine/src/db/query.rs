use forecast_types::SourceKind;
use rusqlite::{OptionalExtension, params, params_from_iter, types::Value};

use crate::db::Db;

#[derive(Debug, Clone)]
pub struct CaseSource {
    pub case_id: i64,
    pub source: SourceKind,
}

#[derive(Debug, Clone)]
pub struct RunCaseRow {
    pub case_id: i64,
    pub status: Option<i64>,
    pub forecast_manual: Option<i64>,
    pub forecast_automated: Option<f64>,
}

fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for index in 0..count {
        if index > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

pub async fn case_exists(db: &Db, case_id: i64) -> Result<bool, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT case_id FROM cases WHERE case_id = ?1",
                params![case_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|error| format!("lookup case {case_id}: {error}"))?;
        Ok::<bool, String>(found.is_some())
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Endpoints of non-deleted "same test, different source" links touching the
/// case, in both directions. The link table is directional; grouping is not.
pub async fn linked_case_ids(db: &Db, case_id: i64) -> Result<Vec<i64>, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT to_case_id FROM case_links
                 WHERE from_case_id = ?1 AND link_kind = 'same-test' AND is_deleted = 0
                 UNION
                 SELECT from_case_id FROM case_links
                 WHERE to_case_id = ?1 AND link_kind = 'same-test' AND is_deleted = 0",
            )
            .map_err(|error| format!("prepare link query: {error}"))?;
        let rows = stmt
            .query_map(params![case_id], |row| row.get(0))
            .map_err(|error| format!("query links for case {case_id}: {error}"))?;
        rows.collect::<Result<Vec<i64>, _>>()
            .map_err(|error| format!("read links for case {case_id}: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn case_sources(db: &Db, case_ids: Vec<i64>) -> Result<Vec<CaseSource>, String> {
    if case_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "SELECT case_id, source FROM cases WHERE case_id IN ({})",
            placeholders(case_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|error| format!("prepare case source query: {error}"))?;
        let rows = stmt
            .query_map(params_from_iter(case_ids.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|error| format!("query case sources: {error}"))?;
        let mut sources = Vec::new();
        for row in rows {
            let (case_id, source) =
                row.map_err(|error| format!("read case source row: {error}"))?;
            sources.push(CaseSource {
                case_id,
                source: SourceKind::parse(&source)
                    .map_err(|error| format!("case {case_id}: {error}"))?,
            });
        }
        Ok::<Vec<CaseSource>, String>(sources)
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Elapsed-time samples from manually recorded results for the given cases,
/// joined through the run-case association. Soft-deleted and non-positive
/// samples are filtered in the query.
pub async fn manual_samples(db: &Db, case_ids: Vec<i64>) -> Result<Vec<i64>, String> {
    if case_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "SELECT mr.elapsed_secs FROM manual_results mr
             JOIN run_cases rc ON rc.run_case_id = mr.run_case_id
             WHERE rc.case_id IN ({})
               AND mr.is_deleted = 0 AND mr.elapsed_secs > 0",
            placeholders(case_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|error| format!("prepare manual sample query: {error}"))?;
        let rows = stmt
            .query_map(params_from_iter(case_ids.iter()), |row| row.get(0))
            .map_err(|error| format!("query manual samples: {error}"))?;
        rows.collect::<Result<Vec<i64>, _>>()
            .map_err(|error| format!("read manual samples: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Elapsed-time samples from automated-suite import records for the given
/// cases, filtered to positive, non-deleted rows.
pub async fn automated_samples(db: &Db, case_ids: Vec<i64>) -> Result<Vec<f64>, String> {
    if case_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "SELECT elapsed_secs FROM automated_results
             WHERE case_id IN ({})
               AND is_deleted = 0 AND elapsed_secs > 0",
            placeholders(case_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|error| format!("prepare automated sample query: {error}"))?;
        let rows = stmt
            .query_map(params_from_iter(case_ids.iter()), |row| row.get(0))
            .map_err(|error| format!("query automated samples: {error}"))?;
        rows.collect::<Result<Vec<f64>, _>>()
            .map_err(|error| format!("read automated samples: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn run_ids_for_cases(db: &Db, case_ids: Vec<i64>) -> Result<Vec<i64>, String> {
    if case_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "SELECT DISTINCT run_id FROM run_cases WHERE case_id IN ({})",
            placeholders(case_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|error| format!("prepare run id query: {error}"))?;
        let rows = stmt
            .query_map(params_from_iter(case_ids.iter()), |row| row.get(0))
            .map_err(|error| format!("query run ids: {error}"))?;
        rows.collect::<Result<Vec<i64>, _>>()
            .map_err(|error| format!("read run ids: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn run_cases_for_run(db: &Db, run_id: i64) -> Result<Vec<RunCaseRow>, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT rc.case_id, rc.status, c.forecast_manual, c.forecast_automated
                 FROM run_cases rc
                 LEFT JOIN cases c ON c.case_id = rc.case_id
                 WHERE rc.run_id = ?1
                 ORDER BY rc.run_case_id",
            )
            .map_err(|error| format!("prepare run case query: {error}"))?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(RunCaseRow {
                    case_id: row.get(0)?,
                    status: row.get(1)?,
                    forecast_manual: row.get(2)?,
                    forecast_automated: row.get(3)?,
                })
            })
            .map_err(|error| format!("query run cases for run {run_id}: {error}"))?;
        rows.collect::<Result<Vec<RunCaseRow>, _>>()
            .map_err(|error| format!("read run cases for run {run_id}: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// One keyset-paginated page of active (non-deleted, non-archived) case ids,
/// strictly after `after_case_id`, in ascending id order.
pub async fn active_case_page(
    db: &Db,
    after_case_id: i64,
    limit: usize,
) -> Result<Vec<i64>, String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT case_id FROM cases
                 WHERE case_id > ?1 AND is_deleted = 0 AND is_archived = 0
                 ORDER BY case_id
                 LIMIT ?2",
            )
            .map_err(|error| format!("prepare active case page query: {error}"))?;
        let rows = stmt
            .query_map(params![after_case_id, limit as i64], |row| row.get(0))
            .map_err(|error| format!("query active case page: {error}"))?;
        rows.collect::<Result<Vec<i64>, _>>()
            .map_err(|error| format!("read active case page: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn not_completed_runs(db: &Db, run_ids: Vec<i64>) -> Result<Vec<i64>, String> {
    if run_ids.is_empty() {
        return Ok(Vec::new());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "SELECT run_id FROM runs WHERE run_id IN ({}) AND is_completed = 0 ORDER BY run_id",
            placeholders(run_ids.len())
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|error| format!("prepare not-completed run query: {error}"))?;
        let rows = stmt
            .query_map(params_from_iter(run_ids.iter()), |row| row.get(0))
            .map_err(|error| format!("query not-completed runs: {error}"))?;
        rows.collect::<Result<Vec<i64>, _>>()
            .map_err(|error| format!("read not-completed runs: {error}"))
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

/// Writes the identical forecast pair to every case in one statement, so the
/// group is updated as a unit. `None` values clear stale forecasts.
pub async fn update_case_forecasts(
    db: &Db,
    case_ids: Vec<i64>,
    manual: Option<i64>,
    automated: Option<f64>,
) -> Result<(), String> {
    if case_ids.is_empty() {
        return Ok(());
    }
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        let sql = format!(
            "UPDATE cases SET forecast_manual = ?, forecast_automated = ? WHERE case_id IN ({})",
            placeholders(case_ids.len())
        );
        let mut values: Vec<Value> = Vec::with_capacity(case_ids.len() + 2);
        values.push(Value::from(manual));
        values.push(Value::from(automated));
        values.extend(case_ids.iter().map(|case_id| Value::from(*case_id)));
        conn.execute(&sql, params_from_iter(values))
            .map_err(|error| format!("update case forecasts: {error}"))?;
        Ok::<(), String>(())
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}

pub async fn update_run_forecast(
    db: &Db,
    run_id: i64,
    manual: Option<i64>,
    automated: Option<f64>,
) -> Result<(), String> {
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.open()?;
        conn.execute(
            "UPDATE runs SET forecast_manual = ?1, forecast_automated = ?2 WHERE run_id = ?3",
            params![manual, automated, run_id],
        )
        .map_err(|error| format!("update run {run_id} forecast: {error}"))?;
        Ok::<(), String>(())
    })
    .await
    .map_err(|error| format!("join sqlite: {error}"))?
}
