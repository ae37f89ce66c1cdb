//! Kafka source - feeds consumed messages to the engine and commits what the
//! engine reports as processed.
//!
//! The consumer never auto-commits. Offsets come from the engine, which only
//! hands out offsets whose emissions were all written and, for the aggregate
//! pipeline, whose updates are covered by a snapshot on disk. A restart
//! therefore re-reads at most the records whose effects may have been lost.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::PipelineEngine;
use crate::error::EngineError;
use crate::metrics::MetricsHelper;
use crate::metrics_const::{
    KAFKA_CONSUMER_ERRORS_COUNTER, OFFSET_COMMITS_COUNTER, RECORDS_LOSSY_DECODED_COUNTER,
};
use crate::record::Record;

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    engine: Arc<PipelineEngine>,
    commit_interval: Duration,
    halted: Mutex<HashSet<i32>>,
    metrics: MetricsHelper,
}

impl KafkaSource {
    /// Create the consumer and subscribe it to `topic`.
    pub fn from_config(
        config: &ClientConfig,
        topic: &str,
        engine: Arc<PipelineEngine>,
        commit_interval: Duration,
    ) -> Result<Self> {
        let consumer: StreamConsumer = config
            .create()
            .context("Failed to create Kafka consumer")?;
        consumer
            .subscribe(&[topic])
            .with_context(|| format!("Failed to subscribe to input topic '{topic}'"))?;

        let metrics = MetricsHelper::new()
            .with_label("pipeline", engine.pipeline())
            .with_label("topic", topic);

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            engine,
            commit_interval,
            halted: Mutex::new(HashSet::new()),
            metrics,
        })
    }

    /// Consume until `shutdown` fires or the engine stops accepting records.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(topic = %self.topic, "Starting Kafka source");
        let mut commit_tick = tokio::time::interval(self.commit_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Kafka source received shutdown signal");
                    break;
                }
                _ = commit_tick.tick() => {
                    self.commit_offsets(CommitMode::Async).await;
                }
                message = self.consumer.recv() => match message {
                    Ok(message) => {
                        let record = self.to_record(&message);
                        match self.engine.submit(record).await {
                            Ok(()) => {}
                            Err(EngineError::PartitionHalted(partition)) => {
                                self.pause_partition(partition);
                            }
                            Err(EngineError::NotRunning(state)) => {
                                info!(
                                    state = %state,
                                    "Engine no longer accepting records, stopping source"
                                );
                                break;
                            }
                            Err(e) => return Err(e).context("Failed to submit record"),
                        }
                    }
                    Err(e) => {
                        error!(error = ?e, "Kafka consumer error");
                        self.metrics.counter(KAFKA_CONSUMER_ERRORS_COUNTER).increment(1);
                    }
                },
            }
        }

        info!(topic = %self.topic, "Kafka source stopped");
        Ok(())
    }

    fn to_record(&self, message: &BorrowedMessage<'_>) -> Record {
        let (key, lossy_key) = decode(message.key());
        let (value, lossy_value) = decode(message.payload());
        if lossy_key || lossy_value {
            warn!(
                partition = message.partition(),
                offset = message.offset(),
                "Message is not valid UTF-8, decoded lossily"
            );
            self.metrics
                .counter(RECORDS_LOSSY_DECODED_COUNTER)
                .increment(1);
        }
        Record::new(key, value, message.partition(), message.offset())
    }

    /// Stop fetching a halted partition. Its uncommitted records are picked up
    /// again after a restart.
    fn pause_partition(&self, partition: i32) {
        let newly_halted = self
            .halted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition);
        if !newly_halted {
            return;
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&self.topic, partition);
        match self.consumer.pause(&tpl) {
            Ok(()) => warn!(partition = partition, "Paused halted partition"),
            Err(e) => error!(partition = partition, error = ?e, "Failed to pause halted partition"),
        }
    }

    /// Commit every offset the engine reports as safe to commit.
    pub async fn commit_offsets(&self, mode: CommitMode) {
        let offsets = match self.engine.committable_offsets().await {
            Ok(offsets) => offsets,
            Err(e) => {
                self.metrics
                    .counter(OFFSET_COMMITS_COUNTER)
                    .with_label("status", "skipped")
                    .increment(1);
                error!(error = ?e, "Failed to persist state, offsets not committed");
                return;
            }
        };
        if offsets.is_empty() {
            return;
        }

        let tpl = match build_commit_list(&self.topic, &offsets) {
            Ok(tpl) => tpl,
            Err(e) => {
                error!(error = ?e, "Failed to build offset commit list");
                return;
            }
        };

        match self.consumer.commit(&tpl, mode) {
            Ok(()) => {
                self.engine.offset_tracker().mark_committed(&offsets);
                self.metrics
                    .counter(OFFSET_COMMITS_COUNTER)
                    .with_label("status", "success")
                    .increment(1);
                debug!(offsets = ?offsets, "Committed offsets");
            }
            Err(e) => {
                self.metrics
                    .counter(OFFSET_COMMITS_COUNTER)
                    .with_label("status", "failure")
                    .increment(1);
                error!(error = ?e, "Failed to commit offsets");
            }
        }
    }

    /// Final synchronous commit, called once the engine has drained.
    pub async fn commit_final(&self) {
        let pending = self.engine.offset_tracker().get_committable_offsets().len();
        info!(partitions = pending, "Committing final offsets");
        self.commit_offsets(CommitMode::Sync).await;
    }
}

fn build_commit_list(topic: &str, offsets: &HashMap<i32, i64>) -> Result<TopicPartitionList> {
    let mut tpl = TopicPartitionList::new();
    for (partition, offset) in offsets {
        tpl.add_partition_offset(topic, *partition, Offset::Offset(*offset))
            .with_context(|| format!("Invalid offset {offset} for partition {partition}"))?;
    }
    Ok(tpl)
}

/// Decode a key or payload. A missing one decodes to an empty string; the
/// flag is set when invalid UTF-8 had to be replaced.
fn decode(bytes: Option<&[u8]>) -> (String, bool) {
    match bytes {
        None => (String::new(), false),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => (s.to_string(), false),
            Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
        },
    }
}
