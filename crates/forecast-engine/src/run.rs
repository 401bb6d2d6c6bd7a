//! Run forecast aggregator.

use std::collections::BTreeSet;

use forecast_types::STATUS_UNTESTED;

use crate::db::{self, Db, RunCaseRow};
use crate::estimate::round_millis;
use crate::forecast;

fn is_pending(row: &RunCaseRow) -> bool {
    match row.status {
        None => true,
        Some(status) => status == STATUS_UNTESTED,
    }
}

/// Recomputes the run-level aggregate forecast from the run's still-pending
/// cases. `refreshed` tracks which case ids already had their group forecasts
/// recomputed in the current batch, so aggregating many runs after a corpus
/// sweep does not redo per-case work.
///
/// A run with no pending cases (including a run with zero cases) has both
/// forecast fields cleared: there is no remaining work to predict, and a
/// stale estimate must not survive completion of the last case.
pub async fn recompute_run(
    db: &Db,
    run_id: i64,
    refreshed: &mut BTreeSet<i64>,
) -> Result<(), String> {
    let mut run_cases = db::run_cases_for_run(db, run_id).await?;

    let stale: Vec<i64> = run_cases
        .iter()
        .map(|row| row.case_id)
        .filter(|case_id| !refreshed.contains(case_id))
        .collect();
    if !stale.is_empty() {
        for case_id in stale {
            if refreshed.contains(&case_id) {
                continue; // an earlier group in this loop covered it
            }
            let group = forecast::recompute_group(db, case_id).await?;
            refreshed.insert(case_id);
            refreshed.extend(group);
        }
        // Case-level forecasts may have changed under us.
        run_cases = db::run_cases_for_run(db, run_id).await?;
    }

    let pending: Vec<&RunCaseRow> = run_cases.iter().filter(|row| is_pending(row)).collect();
    if pending.is_empty() {
        return db::update_run_forecast(db, run_id, None, None).await;
    }

    let mut manual_sum: Option<i64> = None;
    let mut automated_sum: Option<f64> = None;
    for row in &pending {
        if let Some(value) = row.forecast_manual {
            *manual_sum.get_or_insert(0) += value;
        }
        if let Some(value) = row.forecast_automated {
            *automated_sum.get_or_insert(0.0) += value;
        }
    }
    let automated_sum = automated_sum.map(round_millis);
    db::update_run_forecast(db, run_id, manual_sum, automated_sum).await
}
