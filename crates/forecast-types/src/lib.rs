//! Job payload contract and shared domain values for the forecast
//! propagation engine.
//!
//! External callers (ORM write hooks, schedulers, test harnesses) enqueue
//! recomputation work using the two job kind names and payload shapes defined
//! here; the worker crate consumes the same types, so every trigger path
//! speaks the identical contract.

use serde::{Deserialize, Serialize};

/// Recompute the link-group of a single case, then re-aggregate every
/// in-progress run that contains an affected case.
pub const JOB_KIND_RECOMPUTE_CASE: &str = "recompute-case";

/// Recompute forecasts for the entire active case population, one pass per
/// link-group, then re-aggregate every touched, not-yet-completed run.
pub const JOB_KIND_RECOMPUTE_CORPUS: &str = "recompute-corpus";

/// Sentinel status for a run-case that has been created but never executed.
/// A run-case with status `NULL` or this value counts as pending.
pub const STATUS_UNTESTED: i64 = 1;

/// Payload for a [`JOB_KIND_RECOMPUTE_CASE`] job. A payload that is missing
/// the id or carries a non-numeric value fails to decode, which the job
/// processor treats as a fatal, non-retryable validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleCasePayload {
    pub repository_case_id: i64,
}

/// Per-entity success/failure counters embedded in the result of a completed
/// job. A corpus sweep completes with non-zero failure counters rather than
/// failing outright when individual groups or runs error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub cases_ok: u64,
    pub cases_failed: u64,
    pub runs_ok: u64,
    pub runs_failed: u64,
}

/// Which of the two disjoint sources authored a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Authored by hand in the test-management UI; duration samples come
    /// from manually recorded results, in whole seconds.
    Manual,
    /// Imported from an automated suite; duration samples come from import
    /// records with sub-second precision.
    Automated,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Manual => "manual",
            SourceKind::Automated => "automated",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "manual" => Ok(SourceKind::Manual),
            "automated" => Ok(SourceKind::Automated),
            other => Err(format!("unknown case source kind: {other:?}")),
        }
    }
}
