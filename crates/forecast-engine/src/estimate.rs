//! Duration sample collector: reduces raw completion-duration samples from
//! the two sources to per-source scalar estimates for a link-group.

use std::collections::BTreeSet;

use forecast_types::SourceKind;

use crate::db::{self, Db};

/// Per-source estimates for one link-group. `None` means no qualifying
/// samples existed, which is distinct from a true zero duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupEstimates {
    pub manual: Option<i64>,
    pub automated: Option<f64>,
}

/// Partitions the group by source kind and reduces each partition's samples.
///
/// Manual executions are reported in whole seconds by the UI, so the manual
/// estimate is an integer mean. Automated imports carry sub-second precision
/// from the underlying tooling, so the automated estimate keeps 3 decimals;
/// truncating it to whole seconds would destroy the signal compared against
/// manual estimates.
pub async fn collect_estimates(
    db: &Db,
    group: &BTreeSet<i64>,
) -> Result<GroupEstimates, String> {
    let sources = db::case_sources(db, group.iter().copied().collect()).await?;
    let mut manual_cases = Vec::new();
    let mut automated_cases = Vec::new();
    for case in sources {
        match case.source {
            SourceKind::Manual => manual_cases.push(case.case_id),
            SourceKind::Automated => automated_cases.push(case.case_id),
        }
    }

    let manual = mean_whole_seconds(&db::manual_samples(db, manual_cases).await?);
    let automated = mean_millis(&db::automated_samples(db, automated_cases).await?);
    Ok(GroupEstimates { manual, automated })
}

/// Unweighted arithmetic mean rounded to the nearest whole second, or `None`
/// when there are no samples.
pub fn mean_whole_seconds(samples: &[i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    let sum: i64 = samples.iter().sum();
    Some((sum as f64 / samples.len() as f64).round() as i64)
}

/// Unweighted arithmetic mean rounded to 3 decimal places, or `None` when
/// there are no samples.
pub fn mean_millis(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().sum();
    Some(round_millis(sum / samples.len() as f64))
}

pub fn round_millis(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
