use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Connection pool size for the API process
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Redis connection string for the work queue
    pub redis_url: String,

    /// HS256 secret shared with the auth service that issues bearer tokens
    pub jwt_secret: String,

    /// Replicate API token
    pub replicate_api_token: String,

    /// Replicate model identifier, `owner/name`
    #[serde(default = "default_replicate_model")]
    pub replicate_model: String,

    #[serde(default = "default_replicate_base_url")]
    pub replicate_base_url: String,

    /// Upper bound on a single generation call, including provider-side polling
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// R2 bucket name
    pub r2_bucket: String,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: String,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: String,

    /// R2 endpoint URL
    pub r2_endpoint: String,

    /// Redis list carrying task identifiers from the API to the worker
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_dequeue_timeout_secs")]
    pub dequeue_timeout_secs: u64,

    /// Grace period an in-flight task gets after a shutdown signal
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Pause after a queue or store outage before the worker tries again
    #[serde(default = "default_store_retry_backoff_secs")]
    pub store_retry_backoff_secs: u64,

    /// Prometheus listen address for the worker process
    #[serde(default)]
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_replicate_model() -> String {
    "black-forest-labs/flux-schnell".to_string()
}

fn default_replicate_base_url() -> String {
    "https://api.replicate.com".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    120
}

fn default_queue_name() -> String {
    "generate_image_queue".to_string()
}

fn default_dequeue_timeout_secs() -> u64 {
    1
}

fn default_drain_timeout_secs() -> u64 {
    30
}

fn default_store_retry_backoff_secs() -> u64 {
    5
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn store_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.store_retry_backoff_secs)
    }
}
