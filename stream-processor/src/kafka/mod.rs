// Kafka module - binds the engine to topics: consumer source, producer sink, topic bootstrap
pub mod admin;
pub mod sink;
pub mod source;

use rdkafka::ClientConfig;

pub use admin::ensure_topics;
pub use sink::KafkaSink;
pub use source::KafkaSource;

/// Builds `ClientConfig`s with the defaults used by this service.
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Group consumer that never commits on its own. Offsets are committed by
    /// [`KafkaSource`] from what the engine reports as processed.
    pub fn for_consumer(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("socket.timeout.ms", "10000")
            .set("session.timeout.ms", "60000")
            .set("heartbeat.interval.ms", "5000")
            .set("max.poll.interval.ms", "300000");

        Self { config }
    }

    /// Producer with idempotence on, so broker-side retries keep per-partition order.
    pub fn for_producer(bootstrap_servers: &str) -> Self {
        let mut config = ClientConfig::new();

        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("linger.ms", "20")
            .set("compression.codec", "snappy");

        Self { config }
    }

    pub fn for_admin(bootstrap_servers: &str) -> Self {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", bootstrap_servers);
        Self { config }
    }

    /// Enable TLS/SSL for Kafka connection
    pub fn with_tls(mut self, enabled: bool) -> Self {
        if enabled {
            self.config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }
        self
    }

    /// Override offset reset policy (consumers only)
    pub fn with_offset_reset(mut self, policy: &str) -> Self {
        self.config.set("auto.offset.reset", policy);
        self
    }

    pub fn with_message_timeout(mut self, timeout_ms: u128) -> Self {
        self.config
            .set("message.timeout.ms", timeout_ms.to_string());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
