//! The gate engine.
//!
//! Control flow per invocation: orchestrator → definition (once) → pattern
//! (per pattern requirement) → validators (per sub-validation) → report.

pub mod definition;
pub mod orchestrator;
pub mod pattern;
pub mod planning;
pub mod process;
pub mod report;
pub mod requirements;
pub mod retry;
pub mod validators;
