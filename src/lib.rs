//! Phasegate: checkpoint validation for a phased artifact-production workflow.
//!
//! A workflow moves through five phases (intake → specification → planning →
//! build → review) and each transition is guarded by a numbered gate (0-5).
//! A gate passes only when the documents, file patterns, headings and external
//! checks required for its phase are in place.
//!
//! # Architecture
//!
//! - [`core::store`]: the persisted pipeline state (iteration, phases, gates,
//!   tasks, identifier counters). Single-writer; no locking.
//! - [`gates::definition`]: resolves a gate number and the current state into
//!   the concrete requirements of that gate.
//! - [`gates::pattern`]: dependency-free `*` / `**` / `{a,b}` matcher and tree walker.
//! - [`gates::orchestrator`]: runs checks in fixed order, invokes external
//!   validators through [`gates::process::ProcessRunner`], retries the test run.
//! - [`gates::report`]: categorizes errors as fixable or blocking and renders
//!   the decision record.
//!
//! # Binaries
//!
//! ```bash
//! # Check the specification → planning gate, machine-readable
//! gate-check 2 --json
//!
//! # Advance the task counter and mark a phase running
//! pipeline-state counter task next
//! pipeline-state phase build running
//! ```
//!
//! `gate-check` exits 0 on PASS (or usage), 2 on FAIL and 1 on internal faults.

pub mod cli;
pub mod core;
pub mod gates;

pub use crate::core::error::PhaseGateError;
pub use crate::core::store::{PipelineState, StateStore};
pub use crate::gates::orchestrator::Orchestrator;
pub use crate::gates::report::{ErrorCategory, GateResult, GateStatus, ValidationError};
