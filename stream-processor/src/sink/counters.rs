use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::metrics_const::{
    RECORDS_OUTCOME_COUNTER, SINK_RETRIES_COUNTER, SINK_WRITE_FAILURES_COUNTER,
};
use crate::pipelines::Outcome;
use crate::sink::Channel;

/// In-process counters for every routing decision and sink retry.
///
/// Nothing is ever dropped or dead-lettered without passing through here.
/// Every increment is mirrored to the Prometheus recorder.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    replayed: AtomicU64,
    results: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
}

/// Plain copy of [`DispatchCounters`] at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub replayed: u64,
    pub results: u64,
    pub retried: u64,
    pub failed: u64,
}

impl CounterSnapshot {
    /// Records that reached a terminal routing decision
    pub fn routed(&self) -> u64 {
        self.accepted + self.rejected + self.dropped + self.replayed + self.results
    }
}

impl DispatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the routing outcome of one record.
    pub fn record_outcome(&self, pipeline: &'static str, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Accepted => &self.accepted,
            Outcome::Rejected(_) => &self.rejected,
            Outcome::Dropped => &self.dropped,
            Outcome::Replayed => &self.replayed,
            Outcome::Aggregated => &self.results,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut labels = vec![
            ("pipeline", pipeline.to_string()),
            ("outcome", outcome.label().to_string()),
        ];
        if let Outcome::Rejected(reason) = outcome {
            labels.push(("reason", reason.as_str().to_string()));
        }
        metrics::counter!(RECORDS_OUTCOME_COUNTER, &labels).increment(1);
    }

    pub fn record_retry(&self, channel: Channel) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(SINK_RETRIES_COUNTER, "channel" => channel.as_str()).increment(1);
    }

    pub fn record_failure(&self, channel: Channel) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(SINK_WRITE_FAILURES_COUNTER, "channel" => channel.as_str()).increment(1);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            results: self.results.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
