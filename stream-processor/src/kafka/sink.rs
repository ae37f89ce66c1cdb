use std::time::{Duration, Instant};

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::debug;

use crate::error::SinkError;
use crate::metrics::MetricsHelper;
use crate::metrics_const::PRODUCER_SEND_DURATION_MS;
use crate::sink::Sink;

/// Produces every pair to one topic. An empty key is sent as a null key.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    metrics: MetricsHelper,
}

impl KafkaSink {
    pub fn new(producer: FutureProducer, topic: impl Into<String>, send_timeout: Duration) -> Self {
        let topic = topic.into();
        let metrics = MetricsHelper::new()
            .with_label("sink", "kafka")
            .with_label("topic", &topic);
        Self {
            producer,
            topic,
            send_timeout,
            metrics,
        }
    }
}

/// Errors that no amount of retrying will fix
fn classify(error: KafkaError) -> SinkError {
    let fatal = matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
                | RDKafkaErrorCode::InvalidMessageSize
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::InvalidTopic
        )
    );
    if fatal {
        SinkError::Fatal(error.to_string())
    } else {
        SinkError::Transient(error.to_string())
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn write(&self, key: &str, value: &str) -> Result<(), SinkError> {
        let mut record = FutureRecord::<str, str>::to(&self.topic).payload(value);
        if !key.is_empty() {
            record = record.key(key);
        }

        let start = Instant::now();
        let result = self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await;
        self.metrics
            .histogram(PRODUCER_SEND_DURATION_MS)
            .with_label("status", if result.is_ok() { "success" } else { "failure" })
            .record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(_) => Ok(()),
            Err((e, _)) => {
                debug!(topic = %self.topic, error = %e, "Produce failed");
                Err(classify(e))
            }
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let producer = self.producer.clone();
        let timeout = self.send_timeout;
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| SinkError::Fatal(format!("flush task failed: {e}")))?
            .map_err(classify)
    }
}
