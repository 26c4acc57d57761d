//! Session-scoped coordination of streaming probe results.
//!
//! This module owns the run lifecycle of a view (validate, cancel, start, complete) and
//! everything between the engine's push events and the read-only projections shown to the
//! user: session filtering, classification, and aggregation. Post-run processing turns a
//! final snapshot into a report.

mod classify;
mod controller;
mod post_process;
mod session;
mod store;
mod subscription;
mod validate;

pub(crate) use controller::{run_view, RunError, ViewCommand, ViewOptions};
pub(crate) use post_process::build_report;
pub(crate) use store::rank_results;
