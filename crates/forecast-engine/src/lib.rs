//! Forecast propagation engine for the test-management store.
//!
//! Recomputes expected execution duration ("forecast") for test cases and
//! test runs. Cases linked by a "same test, different source" relation form a
//! group and always carry identical forecasts; run-level forecasts are the
//! sum over a run's still-pending cases. Recomputation is driven by two job
//! kinds pulled from a persistent queue: single-case (edit-triggered) and
//! full-corpus (scheduled sweep).
//!
//! The engine only mutates derived forecast columns on pre-existing rows; it
//! never creates domain entities.

pub mod corpus;
pub mod db;
pub mod estimate;
pub mod forecast;
pub mod group;
pub mod job;
pub mod queue;
pub mod run;

pub use db::Db;
