use async_trait::async_trait;
use tracing::info;

use crate::error::SinkError;
use crate::sink::Sink;

/// Writes every pair to the log. Used for dry runs without a producer.
#[derive(Debug, Clone)]
pub struct LogSink {
    destination: String,
}

impl LogSink {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl Sink for LogSink {
    async fn write(&self, key: &str, value: &str) -> Result<(), SinkError> {
        info!(
            destination = %self.destination,
            key = key,
            value = value,
            "Emitting record"
        );
        Ok(())
    }
}
