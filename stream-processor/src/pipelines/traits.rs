//! Contract between the engine and a topology.
//!
//! A topology turns one [`Record`] into a routing [`Outcome`] plus the
//! [`Emission`]s that outcome implies. It never performs I/O: dispatching the
//! emissions is the engine's job, which keeps every branch testable without
//! sinks.

use crate::record::{Record, RejectReason};
use crate::sink::Channel;

/// One `(key, value)` pair bound for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub channel: Channel,
    pub key: String,
    pub value: String,
}

impl Emission {
    pub fn new(channel: Channel, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            channel,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Passed validation, forwarded to `accepted`
    Accepted,
    /// Failed validation or parsing, forwarded to `dead-letter`
    Rejected(RejectReason),
    /// Filtered out on purpose (below threshold); nothing emitted
    Dropped,
    /// Already reflected in the aggregate store. Emits the current average
    /// again when it was the latest update for its key and partition
    Replayed,
    /// Aggregate updated, new average forwarded to `aggregate-result`
    Aggregated,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Accepted => "accepted",
            Outcome::Rejected(_) => "rejected",
            Outcome::Dropped => "dropped",
            Outcome::Replayed => "replayed",
            Outcome::Aggregated => "aggregated",
        }
    }
}

/// The result of running a record through a topology.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub outcome: Outcome,
    pub emissions: Vec<Emission>,
}

impl Processed {
    pub fn new(outcome: Outcome, emissions: Vec<Emission>) -> Self {
        Self { outcome, emissions }
    }

    pub fn silent(outcome: Outcome) -> Self {
        Self {
            outcome,
            emissions: Vec::new(),
        }
    }
}

/// A configured stage sequence.
pub trait Topology: Send + Sync + 'static {
    /// Name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Channels this topology may emit to. The engine refuses to start unless
    /// every one of them is bound to a sink.
    fn channels(&self) -> &'static [Channel];

    /// Run every stage for one record.
    fn process(&self, record: Record) -> Processed;
}
