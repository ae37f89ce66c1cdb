//! Stream processor service.
//!
//! Consumes partitioned records, runs them through one of two stage
//! topologies (filter-and-reject, or filter-parse-aggregate) and routes the
//! results to named output channels with bounded retries.
//!
//! ## Error logging (anyhow)
//!
//! When logging `anyhow::Error` or other error types that implement `std::error::Error` with
//! a cause chain, use formats that include the full chain so root causes are visible in logs:
//!
//! - **Inline format:** `{e:#}`, the full chain on one line (`outer: middle: root cause`).
//! - **Structured field:** `error = ?e`, the full chain with `Caused by:` sections (Debug).
//!
//! When constructing errors, use `.context()` / `.with_context()` so the original error remains
//! the source.

pub mod config;
pub mod engine;
pub mod error;
pub mod kafka;
pub mod metrics;
pub mod metrics_const;
pub mod pipelines;
pub mod record;
pub mod service;
pub mod sink;
pub mod stages;
pub mod store;

// Re-export commonly used types for convenience
pub use config::PipelineType;
pub use engine::{EngineState, PipelineEngine, ShutdownReport};
pub use error::{ConfigError, EngineError, SinkError};
pub use pipelines::{Emission, Outcome, Topology};
pub use record::{Record, RejectReason, ValidationOutcome};
pub use sink::{Channel, Sink, SinkDispatcher};
pub use store::KeyedAggregateStore;
