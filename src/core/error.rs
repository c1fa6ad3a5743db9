use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhaseGateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Unknown gate {0} (valid gates: 0-5)")]
    UnknownGate(u8),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid state transition: {0}")]
    StateTransition(String),
    #[error("Pattern error: {0}")]
    PatternError(String),
}
