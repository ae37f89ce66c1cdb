//! Partition Worker - Dedicated task for processing records from a single partition
//!
//! Each partition gets its own worker with a bounded channel, ensuring:
//! 1. Ordering is preserved within each partition
//! 2. Parallelism is achieved across partitions
//! 3. Backpressure is applied when processing falls behind
//!
//! A record's offset is marked processed only after every emission it
//! produced was written. A sink write that fails for good halts the worker;
//! the records behind it stay unprocessed and uncommitted.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::offset_tracker::OffsetTracker;
use crate::metrics_const::{PARTITIONS_HALTED_COUNTER, RECORD_PROCESSING_DURATION_MS};
use crate::pipelines::Topology;
use crate::record::Record;
use crate::sink::SinkDispatcher;

/// Configuration for partition workers
#[derive(Debug, Clone)]
pub struct PartitionWorkerConfig {
    /// Size of the channel buffer per partition
    pub channel_buffer_size: usize,
}

impl Default for PartitionWorkerConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

/// Lifecycle of a single partition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStatus {
    /// Accepting and processing records
    Active,
    /// Halted after a sink write failed for good
    Failed,
    /// Exited after draining or cancellation
    Stopped,
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartitionStatus::Active => "active",
            PartitionStatus::Failed => "failed",
            PartitionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a worker needs, shared by all workers of one engine.
#[derive(Clone)]
pub struct WorkerContext {
    pub topology: Arc<dyn Topology>,
    pub dispatcher: Arc<SinkDispatcher>,
    pub offset_tracker: Arc<OffsetTracker>,
    pub cancel: CancellationToken,
}

/// A worker that processes records for a single partition
pub struct PartitionWorker {
    partition: i32,
    sender: mpsc::Sender<Record>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<PartitionStatus>>,
}

impl PartitionWorker {
    /// Spawn a worker task for `partition`
    pub fn new(partition: i32, context: WorkerContext, config: &PartitionWorkerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_buffer_size.max(1));
        let failed = Arc::new(AtomicBool::new(false));
        let failed_flag = failed.clone();

        let handle = tokio::spawn(async move {
            Self::run_worker(partition, receiver, context, failed_flag).await
        });

        Self {
            partition,
            sender,
            failed,
            handle: Some(handle),
        }
    }

    /// Get a clone of the sender for use outside of DashMap guards
    ///
    /// This allows callers to release DashMap guards before awaiting on send operations,
    /// preventing blocking of other DashMap operations during backpressure.
    pub fn sender(&self) -> mpsc::Sender<Record> {
        self.sender.clone()
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PartitionStatus {
        if self.is_failed() {
            PartitionStatus::Failed
        } else if self.handle.as_ref().map_or(true, |h| h.is_finished()) {
            PartitionStatus::Stopped
        } else {
            PartitionStatus::Active
        }
    }

    /// Close the channel and wait for the worker to finish what is queued.
    pub async fn shutdown(mut self) -> PartitionStatus {
        drop(self.sender);

        let Some(handle) = self.handle.take() else {
            return PartitionStatus::Stopped;
        };

        match handle.await {
            Ok(status) => {
                debug!(
                    partition = self.partition,
                    status = %status,
                    "Partition worker shut down"
                );
                status
            }
            Err(e) => {
                warn!(
                    partition = self.partition,
                    error = %e,
                    "Partition worker panicked during shutdown"
                );
                PartitionStatus::Failed
            }
        }
    }

    /// The main worker loop
    async fn run_worker(
        partition: i32,
        mut receiver: mpsc::Receiver<Record>,
        context: WorkerContext,
        failed: Arc<AtomicBool>,
    ) -> PartitionStatus {
        let pipeline = context.topology.name();
        info!(partition = partition, pipeline = pipeline, "Starting partition worker");

        loop {
            let record = tokio::select! {
                biased;
                _ = context.cancel.cancelled() => {
                    info!(partition = partition, "Partition worker cancelled");
                    break;
                }
                next = receiver.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };

            let start = Instant::now();
            let offset = record.offset;
            let processed = context.topology.process(record);

            for emission in &processed.emissions {
                if let Err(e) = context
                    .dispatcher
                    .write(emission.channel, &emission.key, &emission.value)
                    .await
                {
                    error!(
                        partition = partition,
                        offset = offset,
                        channel = %emission.channel,
                        error = ?e,
                        "Sink write failed, halting partition - offset not advanced"
                    );
                    failed.store(true, Ordering::SeqCst);
                    metrics::counter!(PARTITIONS_HALTED_COUNTER, "pipeline" => pipeline)
                        .increment(1);
                    return PartitionStatus::Failed;
                }
            }

            context
                .dispatcher
                .counters()
                .record_outcome(pipeline, &processed.outcome);
            context.offset_tracker.mark_processed(partition, offset + 1);

            metrics::histogram!(RECORD_PROCESSING_DURATION_MS, "pipeline" => pipeline)
                .record(start.elapsed().as_secs_f64() * 1000.0);
            debug!(
                partition = partition,
                offset = offset,
                outcome = processed.outcome.label(),
                "Record processed"
            );
        }

        info!(partition = partition, "Partition worker shutting down");
        PartitionStatus::Stopped
    }
}
