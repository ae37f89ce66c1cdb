use std::time::Duration;

use anyhow::{bail, Context, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use tracing::{info, warn};

/// Create `topics` if they do not exist yet. Topics that already exist are
/// left untouched; any other failure is returned.
pub async fn ensure_topics(
    config: &ClientConfig,
    topics: &[&str],
    partitions: i32,
    replication: i32,
) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = config
        .create()
        .context("Failed to create Kafka admin client")?;

    let mut names: Vec<&str> = topics.to_vec();
    names.sort_unstable();
    names.dedup();

    let new_topics: Vec<NewTopic<'_>> = names
        .iter()
        .map(|name| NewTopic::new(name, partitions, TopicReplication::Fixed(replication)))
        .collect();
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

    let results = admin
        .create_topics(&new_topics, &opts)
        .await
        .context("Failed to create topics")?;

    for result in results {
        match result {
            Ok(topic) => info!(
                topic = %topic,
                partitions = partitions,
                replication = replication,
                "Created topic"
            ),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                warn!(topic = %topic, "Topic already exists")
            }
            Err((topic, code)) => bail!("Failed to create topic '{topic}': {code}"),
        }
    }

    Ok(())
}
