use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::info;

/// NATS configuration
#[derive(Clone, Debug, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default = "default_stream_subjects")]
    pub stream_subjects: Vec<String>,
    /// Position events go to `{subject_prefix}.p{partition}`
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Durable consumer names are `{consumer_prefix}-p{partition}`
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: i64,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "NEARYOU_POSITIONS".to_string()
}

fn default_stream_subjects() -> Vec<String> {
    vec!["nearyou.positions.>".to_string()]
}

fn default_subject_prefix() -> String {
    "nearyou.positions".to_string()
}

fn default_partitions() -> u32 {
    4
}

fn default_consumer_prefix() -> String {
    "nearyou-dataflow".to_string()
}

fn default_max_age_days() -> i64 {
    1
}

fn default_max_bytes() -> i64 {
    1024 * 1024 * 1024 // 1GB
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream_name: default_stream_name(),
            stream_subjects: default_stream_subjects(),
            subject_prefix: default_subject_prefix(),
            partitions: default_partitions(),
            consumer_prefix: default_consumer_prefix(),
            max_age_days: default_max_age_days(),
            max_bytes: default_max_bytes(),
        }
    }
}

impl NatsConfig {
    /// Subject carrying one partition's position events.
    pub fn subject_for(&self, partition: u32) -> String {
        format!("{}.p{}", self.subject_prefix, partition)
    }

    /// Durable consumer owning one partition.
    pub fn consumer_for(&self, partition: u32) -> String {
        format!("{}-p{}", self.consumer_prefix, partition)
    }
}

/// NATS client with JetStream
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to NATS and initialize JetStream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to NATS");

        let client = async_nats::connect(&config.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.url))?;

        let jetstream = jetstream::new(client.clone());

        let nats_client = Self {
            client,
            jetstream,
            config,
        };

        nats_client.ensure_stream().await?;

        Ok(nats_client)
    }

    /// Ensure the position stream exists
    async fn ensure_stream(&self) -> Result<()> {
        if self.jetstream.get_stream(&self.config.stream_name).await.is_ok() {
            info!(stream = %self.config.stream_name, "Stream already exists");
            return Ok(());
        }

        let stream_config = stream::Config {
            name: self.config.stream_name.clone(),
            subjects: self.config.stream_subjects.clone(),
            max_age: std::time::Duration::from_secs((self.config.max_age_days.max(0) * 86400) as u64),
            max_bytes: self.config.max_bytes,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context("Failed to create JetStream stream")?;

        info!(stream = %self.config.stream_name, "Created JetStream stream");
        Ok(())
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}
