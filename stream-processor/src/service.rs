use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use rdkafka::producer::FutureProducer;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, PipelineType};
use crate::engine::{PartitionWorkerConfig, PipelineEngine, ShutdownReport};
use crate::kafka::{ensure_topics, ClientConfigBuilder, KafkaSink, KafkaSource};
use crate::pipelines::{AggregateSettings, AggregateTopology, FilterRejectTopology, Topology};
use crate::sink::{Channel, LogSink, Sink, SinkDispatcher};
use crate::stages::ResultLabels;
use crate::store::{KeyedAggregateStore, SnapshotFile};

/// Output channels of `pipeline` and the topic each one is bound to
pub fn channel_topics(config: &Config) -> Vec<(Channel, &str)> {
    match config.pipeline {
        PipelineType::FilterReject => vec![
            (Channel::Accepted, config.accepted_topic.as_str()),
            (Channel::DeadLetter, config.dead_letter_topic.as_str()),
        ],
        PipelineType::Aggregate => vec![
            (Channel::AggregateResult, config.result_topic.as_str()),
            (Channel::DeadLetter, config.dead_letter_topic.as_str()),
        ],
    }
}

/// Build the engine for the configured pipeline around an already bound
/// dispatcher.
pub fn build_engine(config: &Config, dispatcher: SinkDispatcher) -> PipelineEngine {
    let worker_config = PartitionWorkerConfig {
        channel_buffer_size: config.partition_channel_buffer,
    };

    match config.pipeline {
        PipelineType::FilterReject => {
            for word in &config.forbidden_words.0 {
                if word.chars().any(char::is_lowercase) {
                    warn!(
                        word = %word,
                        "Forbidden word has lower-case letters and never matches cleaned text"
                    );
                }
            }
            let topology = FilterRejectTopology::new(
                config.forbidden_words.clone().into_vec(),
                config.max_message_length,
            );
            PipelineEngine::new(Arc::new(topology), dispatcher, worker_config)
        }
        PipelineType::Aggregate => {
            let store = Arc::new(KeyedAggregateStore::new());
            let settings = AggregateSettings {
                threshold: config.temperature_threshold,
                field_count: config.field_count,
                delimiter: config.field_delimiter.clone(),
                labels: ResultLabels::default(),
            };
            let topology: Arc<dyn Topology> =
                Arc::new(AggregateTopology::new(store.clone(), settings));

            let engine = PipelineEngine::new(topology, dispatcher, worker_config).with_store(store);
            match config.snapshot_path_buf() {
                Some(path) => engine.with_snapshot_file(SnapshotFile::new(path)),
                None => engine,
            }
        }
    }
}

/// The stream processor service: Kafka in, engine, Kafka (or the log) out
pub struct StreamProcessorService {
    config: Config,
    engine: Arc<PipelineEngine>,
    source: Option<Arc<KafkaSource>>,
}

impl StreamProcessorService {
    /// Create a new service from configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate().with_context(|| {
            format!(
                "Configuration validation failed for pipeline '{}'",
                config.pipeline
            )
        })?;

        let dispatcher = Self::build_dispatcher(&config)?;
        let engine = Arc::new(build_engine(&config, dispatcher));

        Ok(Self {
            config,
            engine,
            source: None,
        })
    }

    fn build_dispatcher(config: &Config) -> Result<SinkDispatcher> {
        let mut dispatcher = SinkDispatcher::new(config.retry_policy());

        let producer: Option<FutureProducer> = if config.dry_run {
            info!("Dry run enabled, emissions are logged instead of produced");
            None
        } else {
            let producer_config = ClientConfigBuilder::for_producer(&config.kafka_hosts)
                .with_tls(config.kafka_tls)
                .with_message_timeout(config.sink_send_timeout.0.as_millis())
                .build();
            Some(
                producer_config
                    .create()
                    .context("Failed to create Kafka producer")?,
            )
        };

        for (channel, topic) in channel_topics(config) {
            let sink: Arc<dyn Sink> = match &producer {
                Some(producer) => Arc::new(KafkaSink::new(
                    producer.clone(),
                    topic,
                    config.sink_send_timeout.0,
                )),
                None => Arc::new(LogSink::new(topic)),
            };
            info!(channel = %channel, topic = topic, "Bound output channel");
            dispatcher = dispatcher.with_sink(channel, sink);
        }

        Ok(dispatcher)
    }

    /// Initialize the Kafka consumer and prepare for running
    pub fn initialize(&mut self) -> Result<()> {
        if self.source.is_some() {
            return Err(anyhow::anyhow!("Service already initialized"));
        }

        let consumer_config = ClientConfigBuilder::for_consumer(
            &self.config.kafka_hosts,
            &self.config.kafka_consumer_group,
        )
        .with_tls(self.config.kafka_tls)
        .with_offset_reset(&self.config.kafka_consumer_offset_reset)
        .build();

        let source = KafkaSource::from_config(
            &consumer_config,
            &self.config.input_topic,
            self.engine.clone(),
            self.config.commit_interval(),
        )
        .with_context(|| {
            format!(
                "Failed to create Kafka source for topic '{}' with group '{}'",
                self.config.input_topic, self.config.kafka_consumer_group
            )
        })?;

        info!(
            pipeline = %self.config.pipeline,
            input_topic = %self.config.input_topic,
            "Initialized Kafka source"
        );

        self.source = Some(Arc::new(source));
        Ok(())
    }

    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    /// Run the service (blocking until ctrl+c)
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl+c signal: {e:#}");
            }
        })
        .await
        .map(|_| ())
    }

    /// Run the service with a custom shutdown signal (useful for testing)
    pub async fn run_with_shutdown(
        mut self,
        shutdown_signal: impl Future<Output = ()>,
    ) -> Result<ShutdownReport> {
        if self.config.create_topics {
            let admin_config = ClientConfigBuilder::for_admin(&self.config.kafka_hosts)
                .with_tls(self.config.kafka_tls)
                .build();
            ensure_topics(
                &admin_config,
                &self.config.pipeline_topics(),
                self.config.topic_partitions,
                self.config.topic_replication,
            )
            .await
            .context("Failed to bootstrap topics")?;
        }

        if self.source.is_none() {
            self.initialize()?;
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| anyhow::anyhow!("Source not initialized"))?;

        self.engine
            .start()
            .await
            .context("Failed to start pipeline engine")?;

        info!(pipeline = %self.config.pipeline, "Starting stream processor service");

        let source_shutdown = CancellationToken::new();
        let mut source_handle = {
            let source = source.clone();
            let token = source_shutdown.clone();
            tokio::spawn(async move { source.run(token).await })
        };

        tokio::select! {
            _ = shutdown_signal => {
                info!("Received shutdown signal, shutting down gracefully...");
            }
            result = &mut source_handle => {
                match result {
                    Ok(Ok(())) => warn!("Kafka source stopped on its own"),
                    Ok(Err(e)) => error!("Kafka source failed: {e:#}"),
                    Err(e) => error!("Kafka source task panicked: {e:#}"),
                }
            }
        }

        source_shutdown.cancel();
        if !source_handle.is_finished() {
            match tokio::time::timeout(self.config.shutdown_timeout(), source_handle).await {
                Ok(Ok(Ok(()))) => info!("Kafka source stopped normally"),
                Ok(Ok(Err(e))) => error!("Kafka source stopped with error: {e:#}"),
                Ok(Err(e)) => error!("Kafka source task panicked: {e:#}"),
                Err(_) => error!(
                    "Kafka source shutdown timed out after {:?}",
                    self.config.shutdown_timeout()
                ),
            }
        }

        // Past the deadline, workers stop at their next record boundary
        let shutdown_timeout = self.config.shutdown_timeout();
        let cancel = self.engine.cancellation_token();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            warn!(
                "Engine drain exceeded {:?}, cancelling partition workers",
                shutdown_timeout
            );
            cancel.cancel();
        });

        let report = self.engine.shutdown().await;
        deadline.abort();
        source.commit_final().await;

        let report = report.context("Pipeline engine did not shut down cleanly")?;
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "Stream processor service stopped"),
            Err(e) => warn!("Failed to encode shutdown report: {e:#}"),
        }

        Ok(report)
    }
}
