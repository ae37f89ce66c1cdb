//! Types flowing through the pipeline.
//!
//! A [`Record`] is what the ingestion side hands to the engine. Everything else
//! in this module is derived from a record by the stage functions in
//! [`crate::stages`] or by the aggregate store.

use serde::{Deserialize, Serialize};

/// An input record as delivered by the ingestion collaborator.
///
/// Records are immutable once produced. The engine owns a record for the
/// duration of one pipeline pass and then moves it to the sink it is routed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub partition: i32,
    pub offset: i64,
}

impl Record {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            partition,
            offset,
        }
    }

    /// Position of this record in its partition
    pub fn position(&self) -> KeyPosition {
        KeyPosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// Input position that produced an aggregate update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPosition {
    pub partition: i32,
    pub offset: i64,
}

/// A weather reading parsed from a delimited record value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub station: String,
    pub temperature_c: f64,
    pub humidity: f64,
}

/// Why a record was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Empty,
    ForbiddenWord,
    TooLong,
    ParseFailure,
}

impl RejectReason {
    /// Stable label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::ForbiddenWord => "forbidden_word",
            RejectReason::TooLong => "too_long",
            RejectReason::ParseFailure => "parse_failure",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a cleaned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid(String),
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// Running sums for one key.
///
/// `count` only ever grows, so averages are defined as zero until the first
/// update lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateState {
    pub sum_metric_a: f64,
    pub sum_metric_b: f64,
    pub count: i64,
}

impl AggregateState {
    pub fn add(&mut self, metric_a: f64, metric_b: f64) {
        self.sum_metric_a += metric_a;
        self.sum_metric_b += metric_b;
        self.count += 1;
    }

    /// `(avg_a, avg_b)`, or `(0, 0)` for an empty state
    pub fn average(&self) -> (f64, f64) {
        if self.count == 0 {
            (0.0, 0.0)
        } else {
            let count = self.count as f64;
            (self.sum_metric_a / count, self.sum_metric_b / count)
        }
    }
}
