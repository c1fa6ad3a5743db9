//! Shared primitives: errors, configuration, logging, output helpers,
//! timestamps and the pipeline state store.

pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod store;
pub mod time;
