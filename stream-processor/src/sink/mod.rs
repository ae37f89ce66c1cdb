//! Sink Dispatcher - maps logical output channels onto external sinks
//!
//! The engine only ever talks to [`SinkDispatcher`]; what sits behind a
//! channel (a Kafka topic, an in-memory buffer, the log) is decided when the
//! dispatcher is built.

pub mod counters;
pub mod dispatcher;
pub mod log;
pub mod memory;
pub mod retry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

pub use counters::{CounterSnapshot, DispatchCounters};
pub use dispatcher::SinkDispatcher;
pub use log::LogSink;
pub use memory::MemorySink;
pub use retry::RetryPolicy;

/// Logical output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "accepted")]
    Accepted,
    #[serde(rename = "dead-letter")]
    DeadLetter,
    #[serde(rename = "aggregate-result")]
    AggregateResult,
}

impl Channel {
    pub const ALL: [Channel; 3] = [
        Channel::Accepted,
        Channel::DeadLetter,
        Channel::AggregateResult,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Accepted => "accepted",
            Channel::DeadLetter => "dead-letter",
            Channel::AggregateResult => "aggregate-result",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An external destination for `(key, value)` pairs.
///
/// Implementations must be safe to call from several partition workers at
/// once. Writes issued sequentially by one caller must be applied in order.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write one pair. Return [`SinkError::Transient`] for failures worth
    /// retrying and [`SinkError::Fatal`] otherwise.
    async fn write(&self, key: &str, value: &str) -> Result<(), SinkError>;

    /// Push out anything buffered. Called once while the engine drains.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
