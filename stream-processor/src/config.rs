use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::ConfigError;
use crate::sink::RetryPolicy;
use crate::stages::MIN_FIELD_COUNT;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "filter-reject")]
    pub pipeline: PipelineType,

    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "stream-processor")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Topics
    #[envconfig(default = "text-input")]
    pub input_topic: String,

    #[envconfig(default = "text-clean")]
    pub accepted_topic: String,

    #[envconfig(default = "text-dead-letter")]
    pub dead_letter_topic: String,

    #[envconfig(default = "station-averages")]
    pub result_topic: String,

    // Filter-and-reject settings
    #[envconfig(default = "HACK,SPAM,XXX")]
    pub forbidden_words: WordList,

    #[envconfig(default = "100")]
    pub max_message_length: usize,

    // Aggregate settings
    #[envconfig(default = "30.0")]
    pub temperature_threshold: f64,

    #[envconfig(default = "3")]
    pub field_count: usize,

    #[envconfig(default = ",")]
    pub field_delimiter: String,

    // Sink retry configuration
    #[envconfig(default = "5")]
    pub sink_max_attempts: u32,

    #[envconfig(default = "2")]
    pub sink_backoff_coefficient: u32,

    #[envconfig(default = "100")]
    pub sink_initial_interval: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub sink_maximum_interval: EnvMsDuration,

    #[envconfig(default = "5000")]
    pub sink_send_timeout: EnvMsDuration,

    // Processing configuration
    #[envconfig(default = "1000")]
    pub partition_channel_buffer: usize,

    #[envconfig(default = "5")]
    pub commit_interval_secs: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // Enables restore at start and snapshot on drain
    pub snapshot_path: Option<String>,

    // Topic bootstrap
    #[envconfig(default = "false")]
    pub create_topics: bool,

    #[envconfig(default = "3")]
    pub topic_partitions: i32,

    #[envconfig(default = "1")]
    pub topic_replication: i32,

    // Log emissions instead of producing them
    #[envconfig(default = "false")]
    pub dry_run: bool,

    // HTTP server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "8080")]
    pub port: u16,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.temperature_threshold.is_finite() {
            return Err(invalid(
                "TEMPERATURE_THRESHOLD",
                "a finite number",
                self.temperature_threshold,
            ));
        }
        if self.max_message_length == 0 {
            return Err(invalid("MAX_MESSAGE_LENGTH", "at least 1", 0));
        }
        if self.field_count < MIN_FIELD_COUNT {
            return Err(invalid("FIELD_COUNT", "at least 3", self.field_count));
        }
        if self.field_delimiter.is_empty() {
            return Err(invalid("FIELD_DELIMITER", "non-empty", "\"\""));
        }
        if self.sink_max_attempts == 0 {
            return Err(invalid("SINK_MAX_ATTEMPTS", "at least 1", 0));
        }
        if self.sink_backoff_coefficient == 0 {
            return Err(invalid("SINK_BACKOFF_COEFFICIENT", "at least 1", 0));
        }
        if self.partition_channel_buffer == 0 {
            return Err(invalid("PARTITION_CHANNEL_BUFFER", "at least 1", 0));
        }
        if self.forbidden_words.0.iter().any(|w| w.is_empty()) {
            return Err(invalid(
                "FORBIDDEN_WORDS",
                "a comma separated list without empty entries",
                self.forbidden_words.to_string(),
            ));
        }
        if self.topic_partitions < 1 {
            return Err(invalid("TOPIC_PARTITIONS", "at least 1", self.topic_partitions));
        }
        if self.topic_replication < 1 {
            return Err(invalid(
                "TOPIC_REPLICATION",
                "at least 1",
                self.topic_replication,
            ));
        }

        let topics = [
            ("INPUT_TOPIC", &self.input_topic),
            ("ACCEPTED_TOPIC", &self.accepted_topic),
            ("DEAD_LETTER_TOPIC", &self.dead_letter_topic),
            ("RESULT_TOPIC", &self.result_topic),
        ];
        for (name, topic) in topics {
            if topic.trim().is_empty() {
                return Err(invalid(name, "a topic name", "\"\""));
            }
        }

        Ok(())
    }

    /// Get server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn snapshot_path_buf(&self) -> Option<PathBuf> {
        self.snapshot_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::build(self.sink_backoff_coefficient, self.sink_initial_interval.0)
            .maximum_interval(self.sink_maximum_interval.0)
            .max_attempts(self.sink_max_attempts)
            .provide()
    }

    /// Get commit interval as Duration
    pub fn commit_interval(&self) -> Duration {
        Duration::from_secs(self.commit_interval_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Topics read or written by the selected pipeline, input first
    pub fn pipeline_topics(&self) -> Vec<&str> {
        match self.pipeline {
            PipelineType::FilterReject => vec![
                self.input_topic.as_str(),
                self.accepted_topic.as_str(),
                self.dead_letter_topic.as_str(),
            ],
            PipelineType::Aggregate => vec![
                self.input_topic.as_str(),
                self.result_topic.as_str(),
                self.dead_letter_topic.as_str(),
            ],
        }
    }
}

fn invalid(name: &'static str, requirement: &'static str, value: impl fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        requirement,
        value: value.to_string(),
    }
}

/// Which topology the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineType {
    FilterReject,
    Aggregate,
}

impl PipelineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineType::FilterReject => "filter-reject",
            PipelineType::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter-reject" | "filter_reject" | "text" => Ok(PipelineType::FilterReject),
            "aggregate" | "weather" => Ok(PipelineType::Aggregate),
            _ => Err(ConfigError::UnknownPipeline(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected a duration in milliseconds")
    }
}

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

/// Comma separated words, order and case kept. Entries are trimmed; empty
/// entries are kept so that validation can reject them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WordList(pub Vec<String>);

impl WordList {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for WordList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

impl FromStr for WordList {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(WordList::default());
        }
        Ok(WordList(
            s.split(',').map(|w| w.trim().to_string()).collect(),
        ))
    }
}
