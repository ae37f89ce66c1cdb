use thiserror::Error;

use crate::engine::state::EngineState;
use crate::sink::Channel;
use crate::store::SnapshotError;

/// Errors surfaced by sinks and by the dispatcher's retry loop.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transient sink failure: {0}")]
    Transient(String),
    #[error("permanent sink failure: {0}")]
    Fatal(String),
    #[error("no sink bound to channel {0}")]
    UnboundChannel(Channel),
    #[error("write to {channel} failed after {attempts} attempts")]
    RetriesExhausted {
        channel: Channel,
        attempts: u32,
        #[source]
        last: Box<SinkError>,
    },
}

impl SinkError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Errors raised by the pipeline engine itself. Stage outcomes (rejections,
/// parse failures, filtered records) never end up here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is not accepting records (state: {0})")]
    NotRunning(EngineState),
    #[error("partition {0} halted after a fatal sink error")]
    PartitionHalted(i32),
    #[error("invalid engine state transition from {from} to {to}")]
    InvalidTransition { from: EngineState, to: EngineState },
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Configuration problems, detected before any record is processed.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {requirement}, got {value}")]
    InvalidValue {
        name: &'static str,
        requirement: &'static str,
        value: String,
    },
    #[error("unknown pipeline type {0:?}, expected one of: filter-reject, aggregate")]
    UnknownPipeline(String),
}
