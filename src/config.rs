use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub paths: PathsConfig,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub models: ModelsConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// What to do with a record whose embedding call failed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnembeddedPolicy {
    /// Ingest with a `null` vector.
    #[default]
    Ingest,
    /// Fail the artifact at the embedding stage.
    Drop,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_image_batch_size")]
    pub image_batch_size: usize,
    #[serde(default = "default_text_batch_size")]
    pub text_batch_size: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,
    #[serde(default)]
    pub on_embedding_unavailable: UnembeddedPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_batch_size: default_image_batch_size(),
            text_batch_size: default_text_batch_size(),
            task_timeout_secs: default_task_timeout_secs(),
            batch_deadline_secs: None,
            on_embedding_unavailable: UnembeddedPolicy::Ingest,
        }
    }
}

fn default_image_batch_size() -> usize {
    4
}
fn default_text_batch_size() -> usize {
    1
}
fn default_task_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub staging_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub entity_prompt: PathBuf,
    pub describe_prompt: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// External locator prefix, e.g. `s3://acme-docs/reports/q3`.
    pub locator_prefix: String,
    #[serde(default)]
    pub s3: Option<S3StageConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/image_*".to_string(),
        "**/text_*".to_string(),
        "image_*".to_string(),
        "text_*".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwsConfig {
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    pub generative_model: String,
    pub embedding_model: String,
    /// Overrides `https://bedrock-runtime.<region>.amazonaws.com`.
    #[serde(default)]
    pub bedrock_endpoint: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

fn default_max_tokens() -> u32 {
    1024
}
fn default_dims() -> usize {
    1536
}

impl ModelsConfig {
    pub fn bedrock_base_url(&self, region: &str) -> String {
        self.bedrock_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://bedrock-runtime.{}.amazonaws.com", region))
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Full URL the record batch is POSTed to. It must accept a JSON array
    /// of documents, such as an OpenSearch Ingestion pipeline path.
    pub endpoint: String,
    #[serde(default = "default_index_service")]
    pub service: String,
}

fn default_index_service() -> String {
    "osis".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_timeout_secs() -> u64 {
    60
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.pipeline.image_batch_size == 0 {
        anyhow::bail!("pipeline.image_batch_size must be >= 1");
    }
    if config.pipeline.text_batch_size == 0 {
        anyhow::bail!("pipeline.text_batch_size must be >= 1");
    }
    if config.pipeline.task_timeout_secs == 0 {
        anyhow::bail!("pipeline.task_timeout_secs must be > 0");
    }
    if config.pipeline.batch_deadline_secs == Some(0) {
        anyhow::bail!("pipeline.batch_deadline_secs must be > 0 when set");
    }

    if config.models.dims == 0 {
        anyhow::bail!("models.dims must be > 0");
    }
    if config.models.generative_model.trim().is_empty() {
        anyhow::bail!("models.generative_model must not be empty");
    }
    if config.models.embedding_model.trim().is_empty() {
        anyhow::bail!("models.embedding_model must not be empty");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    if !config.index.endpoint.starts_with("http://") && !config.index.endpoint.starts_with("https://")
    {
        anyhow::bail!(
            "index.endpoint must be an http(s) URL, got '{}'",
            config.index.endpoint
        );
    }

    if config.storage.locator_prefix.trim().is_empty() {
        anyhow::bail!("storage.locator_prefix must not be empty");
    }

    Ok(())
}
