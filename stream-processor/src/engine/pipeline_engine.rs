use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::offset_tracker::OffsetTracker;
use crate::engine::partition_worker::{
    PartitionStatus, PartitionWorker, PartitionWorkerConfig, WorkerContext,
};
use crate::engine::state::{AtomicEngineState, EngineState};
use crate::error::{EngineError, SinkError};
use crate::metrics_const::{
    ACTIVE_PARTITION_WORKERS_GAUGE, AGGREGATE_STORE_KEYS_GAUGE, PARTITION_BACKPRESSURE_COUNTER,
    RECORDS_SUBMITTED_COUNTER, STORE_SNAPSHOTS_COUNTER,
};
use crate::pipelines::Topology;
use crate::record::Record;
use crate::sink::{CounterSnapshot, SinkDispatcher};
use crate::store::{KeyedAggregateStore, SnapshotFile, StoreSnapshot};

/// What the engine looked like once it stopped.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub counters: CounterSnapshot,
    pub partitions: BTreeMap<i32, PartitionStatus>,
    /// Next offset to consume per partition
    pub offsets: HashMap<i32, i64>,
    /// Keys written to the snapshot file, if one was taken
    pub snapshot_keys: Option<usize>,
    /// Whether every sink flushed cleanly
    pub flushed: bool,
}

impl ShutdownReport {
    pub fn failed_partitions(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|(_, status)| **status == PartitionStatus::Failed)
            .map(|(partition, _)| *partition)
            .collect()
    }
}

/// Runs a [`Topology`] over partitioned input.
///
/// Records are fanned out to one [`PartitionWorker`] per partition, created on
/// the first record seen for that partition. Records of one partition are
/// processed strictly in submission order; partitions run in parallel.
pub struct PipelineEngine {
    state: AtomicEngineState,
    // Held shared while a submission picks its worker, exclusively while the
    // state leaves Running, so no worker is created behind a drain.
    intake: RwLock<()>,
    workers: DashMap<i32, PartitionWorker>,
    context: WorkerContext,
    worker_config: PartitionWorkerConfig,
    store: Option<Arc<KeyedAggregateStore>>,
    snapshot_file: Option<SnapshotFile>,
}

impl PipelineEngine {
    pub fn new(
        topology: Arc<dyn Topology>,
        dispatcher: SinkDispatcher,
        worker_config: PartitionWorkerConfig,
    ) -> Self {
        Self {
            state: AtomicEngineState::new(),
            intake: RwLock::new(()),
            workers: DashMap::new(),
            context: WorkerContext {
                topology,
                dispatcher: Arc::new(dispatcher),
                offset_tracker: Arc::new(OffsetTracker::new()),
                cancel: CancellationToken::new(),
            },
            worker_config,
            store: None,
            snapshot_file: None,
        }
    }

    /// Attach the aggregate store the topology writes to, so it can be
    /// snapshotted and restored.
    pub fn with_store(mut self, store: Arc<KeyedAggregateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Restore the store from `file` at start and write it back while draining.
    pub fn with_snapshot_file(mut self, file: SnapshotFile) -> Self {
        self.snapshot_file = Some(file);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    pub fn pipeline(&self) -> &'static str {
        self.context.topology.name()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.context.dispatcher.counters().snapshot()
    }

    pub fn offset_tracker(&self) -> &Arc<OffsetTracker> {
        &self.context.offset_tracker
    }

    pub fn store(&self) -> Option<&Arc<KeyedAggregateStore>> {
        self.store.as_ref()
    }

    /// Token that stops every worker at its next record boundary, leaving
    /// queued records unprocessed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    pub fn partition_status(&self, partition: i32) -> Option<PartitionStatus> {
        self.workers.get(&partition).map(|w| w.status())
    }

    pub fn failed_partitions(&self) -> Vec<i32> {
        let mut failed: Vec<i32> = self
            .workers
            .iter()
            .filter(|w| w.is_failed())
            .map(|w| *w.key())
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Check channel bindings, restore the store if a snapshot exists and
    /// start accepting records.
    pub async fn start(&self) -> Result<(), EngineError> {
        let current = self.state.get();
        if current != EngineState::Created {
            return Err(EngineError::InvalidTransition {
                from: current,
                to: EngineState::Running,
            });
        }

        for channel in self.context.topology.channels() {
            if !self.context.dispatcher.is_bound(*channel) {
                return Err(SinkError::UnboundChannel(*channel).into());
            }
        }

        if self.store.is_some() && self.snapshot_file.is_none() {
            warn!(
                pipeline = self.pipeline(),
                "Aggregate store has no snapshot file, offsets will not be committed"
            );
        }

        if let (Some(file), Some(store)) = (&self.snapshot_file, &self.store) {
            match file.load().await? {
                Some(snapshot) => {
                    store.restore(snapshot);
                    metrics::gauge!(AGGREGATE_STORE_KEYS_GAUGE).set(store.len() as f64);
                }
                None => info!(path = %file.path().display(), "No snapshot found, starting empty"),
            }
        }

        self.state
            .transition(EngineState::Created, EngineState::Running)?;
        info!(pipeline = self.pipeline(), "Pipeline engine running");
        Ok(())
    }

    /// Hand a record to its partition worker.
    ///
    /// Waits while the partition queue is full. Fails if the engine is not
    /// running or if the partition halted after a sink failure.
    pub async fn submit(&self, record: Record) -> Result<(), EngineError> {
        let partition = record.partition;
        let sender = {
            let _intake = self.intake.read().unwrap_or_else(PoisonError::into_inner);
            let state = self.state.get();
            if state != EngineState::Running {
                return Err(EngineError::NotRunning(state));
            }

            let worker = self.workers.entry(partition).or_insert_with(|| {
                info!(partition = partition, "Creating partition worker");
                let worker =
                    PartitionWorker::new(partition, self.context.clone(), &self.worker_config);
                metrics::gauge!(ACTIVE_PARTITION_WORKERS_GAUGE).increment(1.0);
                worker
            });
            if worker.is_failed() {
                return Err(EngineError::PartitionHalted(partition));
            }
            worker.sender()
        };

        metrics::counter!(RECORDS_SUBMITTED_COUNTER, "pipeline" => self.pipeline()).increment(1);

        match sender.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => {
                metrics::counter!(
                    PARTITION_BACKPRESSURE_COUNTER,
                    "partition" => partition.to_string()
                )
                .increment(1);
                sender
                    .send(record)
                    .await
                    .map_err(|_| self.closed_partition_error(partition))
            }
            Err(TrySendError::Closed(_)) => Err(self.closed_partition_error(partition)),
        }
    }

    fn closed_partition_error(&self, partition: i32) -> EngineError {
        match self.workers.get(&partition) {
            Some(worker) if worker.is_failed() => EngineError::PartitionHalted(partition),
            _ => EngineError::NotRunning(self.state.get()),
        }
    }

    /// Write the store to the snapshot file, if both are configured.
    pub async fn snapshot(&self) -> Result<Option<StoreSnapshot>, EngineError> {
        let (Some(file), Some(store)) = (&self.snapshot_file, &self.store) else {
            return Ok(None);
        };

        let snapshot = store.snapshot();
        match file.write(&snapshot).await {
            Ok(()) => {
                metrics::counter!(STORE_SNAPSHOTS_COUNTER, "status" => "success").increment(1);
                metrics::gauge!(AGGREGATE_STORE_KEYS_GAUGE).set(snapshot.key_count() as f64);
                Ok(Some(snapshot))
            }
            Err(e) => {
                metrics::counter!(STORE_SNAPSHOTS_COUNTER, "status" => "failure").increment(1);
                Err(e.into())
            }
        }
    }

    /// Offsets that are safe to commit.
    ///
    /// Without an aggregate store these are the offsets that advanced since the
    /// last commit. With a store they are only returned once a snapshot
    /// covering them is on disk, and never when the store is not persisted, so
    /// a restart can always rebuild the state from committed input.
    pub async fn committable_offsets(&self) -> Result<HashMap<i32, i64>, EngineError> {
        // Read before snapshotting: an offset is marked after its update
        // landed, so the snapshot taken next covers all of them.
        let offsets = self.context.offset_tracker.get_committable_offsets();
        if offsets.is_empty() || self.store.is_none() {
            return Ok(offsets);
        }
        if self.snapshot_file.is_none() {
            return Ok(HashMap::new());
        }

        self.snapshot().await?;
        Ok(offsets)
    }

    /// Stop intake, let every worker finish its queue, flush the sinks,
    /// snapshot the store and stop.
    pub async fn shutdown(&self) -> Result<ShutdownReport, EngineError> {
        {
            let _intake = self.intake.write().unwrap_or_else(PoisonError::into_inner);
            self.state
                .transition(EngineState::Running, EngineState::Draining)?;
        }
        info!(
            pipeline = self.pipeline(),
            partitions = self.workers.len(),
            "Draining pipeline engine"
        );

        let partitions: Vec<i32> = self.workers.iter().map(|w| *w.key()).collect();
        let workers: Vec<PartitionWorker> = partitions
            .into_iter()
            .filter_map(|partition| self.workers.remove(&partition).map(|(_, w)| w))
            .collect();

        let statuses = join_all(workers.into_iter().map(|worker| async move {
            let partition = worker.partition();
            (partition, worker.shutdown().await)
        }))
        .await;
        metrics::gauge!(ACTIVE_PARTITION_WORKERS_GAUGE).set(0.0);

        let flushed = match self.context.dispatcher.flush().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = ?e, "Failed to flush sinks while draining");
                false
            }
        };

        let snapshot_result = self.snapshot().await;

        self.state
            .transition(EngineState::Draining, EngineState::Stopped)?;

        let snapshot_keys = snapshot_result
            .inspect_err(|e| error!(error = ?e, "Failed to snapshot aggregate store"))?
            .map(|snapshot| snapshot.key_count());

        let partitions: BTreeMap<i32, PartitionStatus> = statuses.into_iter().collect();
        let report = ShutdownReport {
            counters: self.counters(),
            offsets: self.context.offset_tracker.get_all_offsets(),
            snapshot_keys,
            flushed,
            partitions,
        };

        let failed = report.failed_partitions();
        if failed.is_empty() {
            info!(counters = ?report.counters, "Pipeline engine stopped");
        } else {
            warn!(
                counters = ?report.counters,
                failed_partitions = ?failed,
                "Pipeline engine stopped with halted partitions"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::{AggregateSettings, AggregateTopology, FilterRejectTopology};
    use crate::sink::{Channel, MemorySink, RetryPolicy};
    use std::time::Duration;

    fn dispatcher(accepted: Arc<MemorySink>, dead_letter: Arc<MemorySink>) -> SinkDispatcher {
        let policy = RetryPolicy::build(2, Duration::from_millis(1))
            .max_attempts(3)
            .provide();
        SinkDispatcher::new(policy)
            .with_sink(Channel::Accepted, accepted)
            .with_sink(Channel::DeadLetter, dead_letter)
    }

    fn engine(accepted: Arc<MemorySink>, dead_letter: Arc<MemorySink>) -> PipelineEngine {
        PipelineEngine::new(
            Arc::new(FilterRejectTopology::new(vec!["SPAM".to_string()], 100)),
            dispatcher(accepted, dead_letter),
            PartitionWorkerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_submit_before_start_is_refused() {
        let engine = engine(Arc::new(MemorySink::new()), Arc::new(MemorySink::new()));
        let err = engine
            .submit(Record::new("k", "v", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRunning(EngineState::Created)));
    }

    #[tokio::test]
    async fn test_start_requires_bound_channels() {
        let policy = RetryPolicy::build(2, Duration::from_millis(1)).provide();
        let dispatcher =
            SinkDispatcher::new(policy).with_sink(Channel::Accepted, Arc::new(MemorySink::new()));
        let engine = PipelineEngine::new(
            Arc::new(FilterRejectTopology::new(vec![], 100)),
            dispatcher,
            PartitionWorkerConfig::default(),
        );

        let err = engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Sink(SinkError::UnboundChannel(Channel::DeadLetter))
        ));
        assert_eq!(engine.state(), EngineState::Created);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = engine(Arc::new(MemorySink::new()), Arc::new(MemorySink::new()));
        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_records_flow_to_sinks_and_offsets_advance() {
        let accepted = Arc::new(MemorySink::new());
        let dead_letter = Arc::new(MemorySink::new());
        let engine = engine(accepted.clone(), dead_letter.clone());
        engine.start().await.unwrap();

        engine.submit(Record::new("a", "hello", 0, 0)).await.unwrap();
        engine.submit(Record::new("b", "SPAM", 1, 0)).await.unwrap();
        engine.submit(Record::new("c", "world", 0, 1)).await.unwrap();

        let report = engine.shutdown().await.unwrap();

        assert_eq!(accepted.values(), vec!["HELLO", "WORLD"]);
        assert_eq!(dead_letter.values(), vec!["SPAM"]);
        assert_eq!(report.offsets, HashMap::from([(0, 2), (1, 1)]));
        assert_eq!(report.counters.accepted, 2);
        assert_eq!(report.counters.rejected, 1);
        assert!(report.flushed);
        assert_eq!(accepted.flush_count(), 1);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    fn aggregate_engine(snapshot_file: Option<SnapshotFile>) -> PipelineEngine {
        let store = Arc::new(KeyedAggregateStore::new());
        let policy = RetryPolicy::build(2, Duration::from_millis(1)).provide();
        let dispatcher = SinkDispatcher::new(policy)
            .with_sink(Channel::AggregateResult, Arc::new(MemorySink::new()))
            .with_sink(Channel::DeadLetter, Arc::new(MemorySink::new()));
        let topology = AggregateTopology::new(store.clone(), AggregateSettings::default());
        let engine = PipelineEngine::new(
            Arc::new(topology),
            dispatcher,
            PartitionWorkerConfig::default(),
        )
        .with_store(store);
        match snapshot_file {
            Some(file) => engine.with_snapshot_file(file),
            None => engine,
        }
    }

    async fn wait_for_offset(engine: &PipelineEngine, partition: i32, offset: i64) {
        for _ in 0..200 {
            if engine.offset_tracker().get_partition_offset(partition) == Some(offset) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("partition {partition} never reached offset {offset}");
    }

    #[tokio::test]
    async fn test_stateless_offsets_are_committable_as_processed() {
        let engine = engine(Arc::new(MemorySink::new()), Arc::new(MemorySink::new()));
        engine.start().await.unwrap();
        engine.submit(Record::new("a", "hello", 3, 9)).await.unwrap();
        wait_for_offset(&engine, 3, 10).await;

        let offsets = engine.committable_offsets().await.unwrap();
        assert_eq!(offsets, HashMap::from([(3, 10)]));
    }

    #[tokio::test]
    async fn test_aggregate_offsets_are_committable_once_snapshotted() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let engine = aggregate_engine(Some(SnapshotFile::new(&path)));
        engine.start().await.unwrap();
        engine
            .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
            .await
            .unwrap();
        wait_for_offset(&engine, 0, 1).await;
        assert!(!path.exists());

        let offsets = engine.committable_offsets().await.unwrap();

        assert_eq!(offsets, HashMap::from([(0, 1)]));
        let saved = SnapshotFile::new(&path).load().await.unwrap().unwrap();
        assert_eq!(saved.entries["StationA"].applied.get(&0), Some(&0));
    }

    #[tokio::test]
    async fn test_unpersisted_aggregate_offsets_are_never_committable() {
        let engine = aggregate_engine(None);
        engine.start().await.unwrap();
        engine
            .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
            .await
            .unwrap();
        wait_for_offset(&engine, 0, 1).await;

        assert!(engine.committable_offsets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_snapshot_withholds_offsets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let engine = aggregate_engine(Some(SnapshotFile::new(&path)));
        engine.start().await.unwrap();
        engine
            .submit(Record::new("", "StationA,35.0,60.0", 0, 0))
            .await
            .unwrap();
        wait_for_offset(&engine, 0, 1).await;

        // A directory in place of the snapshot makes the rename fail
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        assert!(matches!(
            engine.committable_offsets().await,
            Err(EngineError::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_twice_fails() {
        let engine = engine(Arc::new(MemorySink::new()), Arc::new(MemorySink::new()));
        engine.start().await.unwrap();
        engine.shutdown().await.unwrap();

        assert!(matches!(
            engine.shutdown().await,
            Err(EngineError::InvalidTransition {
                from: EngineState::Stopped,
                ..
            })
        ));
    }
}
