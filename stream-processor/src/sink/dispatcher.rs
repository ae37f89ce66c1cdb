use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, warn};

use crate::error::SinkError;
use crate::metrics_const::SINK_WRITE_DURATION_MS;
use crate::sink::counters::DispatchCounters;
use crate::sink::retry::RetryPolicy;
use crate::sink::{Channel, Sink};

/// Routes writes for a logical channel to the sink bound to it, retrying
/// transient failures with exponential backoff.
///
/// Each call to [`SinkDispatcher::write`] completes (or gives up) before it
/// returns, so a caller issuing writes one after another gets them applied in
/// that order.
pub struct SinkDispatcher {
    sinks: HashMap<Channel, Arc<dyn Sink>>,
    retry_policy: RetryPolicy,
    counters: Arc<DispatchCounters>,
}

impl SinkDispatcher {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            sinks: HashMap::new(),
            retry_policy,
            counters: Arc::new(DispatchCounters::new()),
        }
    }

    /// Bind `sink` to `channel`, replacing any previous binding.
    pub fn with_sink(mut self, channel: Channel, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(channel, sink);
        self
    }

    pub fn is_bound(&self, channel: Channel) -> bool {
        self.sinks.contains_key(&channel)
    }

    pub fn counters(&self) -> &Arc<DispatchCounters> {
        &self.counters
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub async fn write(&self, channel: Channel, key: &str, value: &str) -> Result<(), SinkError> {
        let Some(sink) = self.sinks.get(&channel) else {
            self.counters.record_failure(channel);
            return Err(SinkError::UnboundChannel(channel));
        };

        let mut attempt: u32 = 1;
        loop {
            let start = Instant::now();
            let result = sink.write(key, value).await;
            metrics::histogram!(SINK_WRITE_DURATION_MS, "channel" => channel.as_str())
                .record(start.elapsed().as_secs_f64() * 1000.0);

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if !err.is_retryable() {
                error!(
                    channel = %channel,
                    key = key,
                    attempt = attempt,
                    error = %err,
                    "Sink write failed permanently"
                );
                self.counters.record_failure(channel);
                return Err(err);
            }

            if !self.retry_policy.should_retry(attempt) {
                error!(
                    channel = %channel,
                    key = key,
                    attempts = attempt,
                    error = %err,
                    "Sink write retries exhausted"
                );
                self.counters.record_failure(channel);
                return Err(SinkError::RetriesExhausted {
                    channel,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.retry_policy.retry_interval(attempt);
            warn!(
                channel = %channel,
                key = key,
                attempt = attempt,
                max_attempts = self.retry_policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Sink write failed, retrying"
            );
            self.counters.record_retry(channel);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Flush every bound sink, returning the first error after trying all.
    pub async fn flush(&self) -> Result<(), SinkError> {
        let mut first_error = None;
        for (channel, sink) in &self.sinks {
            if let Err(e) = sink.flush().await {
                error!(channel = %channel, error = %e, "Failed to flush sink");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
