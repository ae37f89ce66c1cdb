//! Pipeline Engine - lifecycle, per-partition workers and offset tracking
//!
//! The engine owns no stage logic. It moves records from [`PipelineEngine::submit`]
//! to the worker for their partition, runs the configured topology there and
//! dispatches the resulting emissions.

pub mod offset_tracker;
pub mod partition_worker;
pub mod pipeline_engine;
pub mod state;

pub use offset_tracker::OffsetTracker;
pub use partition_worker::{PartitionStatus, PartitionWorkerConfig};
pub use pipeline_engine::{PipelineEngine, ShutdownReport};
pub use state::EngineState;
