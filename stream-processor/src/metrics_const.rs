// ==== Routing metrics ====
/// Counter for routing outcomes, labelled by pipeline, outcome and reject reason
pub const RECORDS_OUTCOME_COUNTER: &str = "records_outcome_total";

/// Counter for records submitted to the engine
pub const RECORDS_SUBMITTED_COUNTER: &str = "records_submitted_total";

/// Histogram for the time spent running one record through its topology and sinks
pub const RECORD_PROCESSING_DURATION_MS: &str = "record_processing_duration_ms";

// ==== Sink metrics ====
/// Counter for sink write attempts that failed and were retried
pub const SINK_RETRIES_COUNTER: &str = "sink_retries_total";

/// Counter for sink writes that failed for good (fatal error or retries exhausted)
pub const SINK_WRITE_FAILURES_COUNTER: &str = "sink_write_failures_total";

/// Histogram for a single sink write attempt
pub const SINK_WRITE_DURATION_MS: &str = "sink_write_duration_ms";

// ==== Engine metrics ====
/// Gauge for the engine state (0 created, 1 running, 2 draining, 3 stopped)
pub const ENGINE_STATE_GAUGE: &str = "engine_state";

/// Gauge for the number of live partition workers
pub const ACTIVE_PARTITION_WORKERS_GAUGE: &str = "active_partition_workers";

/// Counter for partitions halted after a fatal sink error
pub const PARTITIONS_HALTED_COUNTER: &str = "partitions_halted_total";

/// Counter for submissions that had to wait for room in a partition queue
pub const PARTITION_BACKPRESSURE_COUNTER: &str = "partition_backpressure_total";

// ==== Store metrics ====
/// Gauge for the number of keys held by the aggregate store
pub const AGGREGATE_STORE_KEYS_GAUGE: &str = "aggregate_store_keys";

/// Counter for snapshot writes, labelled by status (success/failure)
pub const STORE_SNAPSHOTS_COUNTER: &str = "store_snapshots_total";

// ==== Kafka metrics ====
/// Counter for consumed payloads that were not valid UTF-8 and were decoded lossily
pub const RECORDS_LOSSY_DECODED_COUNTER: &str = "records_lossy_decoded_total";

/// Histogram for a single Kafka produce call, labelled by topic and status
pub const PRODUCER_SEND_DURATION_MS: &str = "producer_send_duration_ms";

/// Counter for consumer errors returned by the broker client
pub const KAFKA_CONSUMER_ERRORS_COUNTER: &str = "kafka_consumer_errors_total";

/// Counter for offset commits, labelled by status (success/failure)
pub const OFFSET_COMMITS_COUNTER: &str = "offset_commits_total";
