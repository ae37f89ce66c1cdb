#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stream_processor::engine::PartitionWorkerConfig;
use stream_processor::pipelines::{AggregateSettings, AggregateTopology, FilterRejectTopology};
use stream_processor::sink::{Channel, MemorySink, RetryPolicy, SinkDispatcher};
use stream_processor::store::{KeyedAggregateStore, SnapshotFile};
use stream_processor::PipelineEngine;

pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::build(2, Duration::from_millis(1))
        .maximum_interval(Duration::from_millis(5))
        .max_attempts(max_attempts)
        .provide()
}

pub fn forbidden_words() -> Vec<String> {
    vec!["HACK".to_string(), "SPAM".to_string(), "XXX".to_string()]
}

pub struct TextHarness {
    pub engine: PipelineEngine,
    pub accepted: Arc<MemorySink>,
    pub dead_letter: Arc<MemorySink>,
}

pub fn text_engine(max_attempts: u32) -> TextHarness {
    let accepted = Arc::new(MemorySink::new());
    let dead_letter = Arc::new(MemorySink::new());
    let dispatcher = SinkDispatcher::new(fast_policy(max_attempts))
        .with_sink(Channel::Accepted, accepted.clone())
        .with_sink(Channel::DeadLetter, dead_letter.clone());

    let engine = PipelineEngine::new(
        Arc::new(FilterRejectTopology::new(forbidden_words(), 100)),
        dispatcher,
        PartitionWorkerConfig {
            channel_buffer_size: 16,
        },
    );

    TextHarness {
        engine,
        accepted,
        dead_letter,
    }
}

pub struct WeatherHarness {
    pub engine: PipelineEngine,
    pub store: Arc<KeyedAggregateStore>,
    pub results: Arc<MemorySink>,
    pub dead_letter: Arc<MemorySink>,
}

pub fn weather_engine(snapshot: Option<SnapshotFile>) -> WeatherHarness {
    let store = Arc::new(KeyedAggregateStore::new());
    let results = Arc::new(MemorySink::new());
    let dead_letter = Arc::new(MemorySink::new());
    let dispatcher = SinkDispatcher::new(fast_policy(3))
        .with_sink(Channel::AggregateResult, results.clone())
        .with_sink(Channel::DeadLetter, dead_letter.clone());

    let topology = AggregateTopology::new(store.clone(), AggregateSettings::default());
    let engine = PipelineEngine::new(
        Arc::new(topology),
        dispatcher,
        PartitionWorkerConfig {
            channel_buffer_size: 16,
        },
    )
    .with_store(store.clone());
    let engine = match snapshot {
        Some(file) => engine.with_snapshot_file(file),
        None => engine,
    };

    WeatherHarness {
        engine,
        store,
        results,
        dead_letter,
    }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
