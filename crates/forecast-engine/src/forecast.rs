//! Case forecast writer.

use std::collections::BTreeSet;

use crate::db::{self, Db};
use crate::estimate::{self, GroupEstimates};
use crate::group;

/// Persists the identical estimate pair onto every case in the group,
/// unconditionally. A group with no qualifying samples writes `NULL`,
/// actively clearing stale forecasts. Re-running with the same inputs is a
/// no-op in effect.
pub async fn apply_to_group(
    db: &Db,
    group: &BTreeSet<i64>,
    estimates: GroupEstimates,
) -> Result<(), String> {
    db::update_case_forecasts(
        db,
        group.iter().copied().collect(),
        estimates.manual,
        estimates.automated,
    )
    .await
}

/// Resolves the group of `case_id`, collects estimates, and writes them to
/// every member. Returns the group that was touched; empty when the case no
/// longer exists (nothing written).
pub async fn recompute_group(db: &Db, case_id: i64) -> Result<BTreeSet<i64>, String> {
    let group = group::resolve_group(db, case_id).await?;
    if group.is_empty() {
        return Ok(group);
    }
    let estimates = estimate::collect_estimates(db, &group).await?;
    apply_to_group(db, &group, estimates).await?;
    Ok(group)
}
