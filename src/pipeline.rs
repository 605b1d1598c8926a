//! Pipeline driver.
//!
//! Wires the stages into the per-artifact state machine and runs the image
//! and text pipelines as independent batched orchestrations:
//!
//! ```text
//! Pending → Extracting → Embedding → Assembling → Ingesting → Committed
//!                └───────────┴────────────┴───────────┴──────→ Failed
//! ```
//!
//! A [`PipelineContext`] is built once per run from the [`Config`] and the
//! environment credentials. Every component it holds is immutable and shared
//! through `Arc`; the context is dropped when the run ends.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::acquire::{ArtifactSource, S3Stage, StagingDir};
use crate::assemble::{assemble, content_text};
use crate::config::{Config, PathsConfig, UnembeddedPolicy};
use crate::embedding::{Embedder, EmbeddingGenerator};
use crate::error::{ArtifactError, Stage};
use crate::extract::{BedrockGenerativeModel, EntityExtractor, ImageEntityExtractor, TextEntityExtractor};
use crate::ingest::{AuditStore, IndexSink, IngestionClient};
use crate::models::{Artifact, ArtifactKind, IngestRecord};
use crate::orchestrator::{run_batched, ArtifactFailure, ArtifactWorker, BatchLimits, StageCell};
use crate::progress::ProgressReporter;
use crate::remote::RemoteClient;
use crate::sigv4::{Credentials, SigV4Signer};

/// Extraction prompt templates. Unreadable or empty templates are fatal.
#[derive(Debug, Clone)]
pub struct Prompts {
    pub entity: String,
    pub describe: String,
}

impl Prompts {
    pub fn load(paths: &PathsConfig) -> Result<Self> {
        Ok(Self {
            entity: read_prompt(&paths.entity_prompt)?,
            describe: read_prompt(&paths.describe_prompt)?,
        })
    }
}

fn read_prompt(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
    let text = text.trim();
    if text.is_empty() {
        bail!("Prompt template is empty: {}", path.display());
    }
    Ok(text.to_string())
}

/// The full per-artifact pipeline for one artifact kind.
pub struct ArtifactPipeline {
    extractor: Arc<dyn EntityExtractor>,
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn IndexSink>,
    locator_prefix: String,
    unembedded: UnembeddedPolicy,
}

impl ArtifactPipeline {
    pub fn new(
        extractor: Arc<dyn EntityExtractor>,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn IndexSink>,
        locator_prefix: impl Into<String>,
        unembedded: UnembeddedPolicy,
    ) -> Self {
        Self {
            extractor,
            embedder,
            sink,
            locator_prefix: locator_prefix.into(),
            unembedded,
        }
    }
}

#[async_trait]
impl ArtifactWorker<Artifact> for ArtifactPipeline {
    type Output = IngestRecord;

    fn label(&self, artifact: &Artifact) -> String {
        artifact.file_name.clone()
    }

    async fn process(&self, artifact: Artifact, stage: &StageCell) -> Result<IngestRecord, ArtifactError> {
        stage.set(Stage::Extracting);
        debug!(artifact = %artifact.stem, stage = %Stage::Extracting);
        let entities = self.extractor.extract(&artifact).await?;

        stage.set(Stage::Embedding);
        debug!(artifact = %artifact.stem, stage = %Stage::Embedding, entities = entities.entities.len());
        let embedding = self.embedder.embed(&content_text(&artifact, &entities)).await;
        if !embedding.is_available() && self.unembedded == UnembeddedPolicy::Drop {
            return Err(ArtifactError::Unembedded);
        }

        stage.set(Stage::Assembling);
        let record = assemble(&artifact, &entities, embedding, &self.locator_prefix)?;

        stage.set(Stage::Ingesting);
        debug!(artifact = %artifact.stem, stage = %Stage::Ingesting);
        self.sink.ingest(&artifact, &record).await?;

        stage.set(Stage::Committed);
        Ok(record)
    }
}

/// Immutable run state shared by both pipelines.
pub struct PipelineContext {
    pub image: Arc<ArtifactPipeline>,
    pub text: Arc<ArtifactPipeline>,
    pub image_batch_size: usize,
    pub text_batch_size: usize,
    pub limits: BatchLimits,
}

impl PipelineContext {
    /// Build the Bedrock, index and audit clients from `config`.
    pub fn build(config: &Config, credentials: Credentials) -> Result<Self> {
        let prompts = Prompts::load(&config.paths)?;
        let http = RemoteClient::http_client(config.retry.request_timeout())
            .context("Failed to build HTTP client")?;
        let retry = config.retry.policy();
        let region = config.aws.region.as_str();
        let bedrock_url = config.models.bedrock_base_url(region);

        let bedrock_signer = SigV4Signer::new(credentials.clone(), region, "bedrock");
        let model = BedrockGenerativeModel::new(
            RemoteClient::new(http.clone(), bedrock_signer.clone(), retry),
            &bedrock_url,
            &config.models.generative_model,
            config.models.max_tokens,
        )?;
        let embedder = EmbeddingGenerator::new(
            RemoteClient::new(http.clone(), bedrock_signer, retry),
            &bedrock_url,
            &config.models.embedding_model,
            config.models.dims,
        )?;

        let index_signer = SigV4Signer::new(credentials, region, &config.index.service);
        let sink = IngestionClient::new(
            RemoteClient::new(http, index_signer, retry),
            &config.index.endpoint,
            AuditStore::new(&config.paths.audit_dir),
        )?;

        let image_extractor = ImageEntityExtractor::new(Arc::new(model), prompts.entity, prompts.describe);

        Ok(Self::with_components(
            config,
            Arc::new(image_extractor),
            Arc::new(TextEntityExtractor),
            Arc::new(embedder),
            Arc::new(sink),
        ))
    }

    /// Assemble a context from already-built stage implementations.
    pub fn with_components(
        config: &Config,
        image_extractor: Arc<dyn EntityExtractor>,
        text_extractor: Arc<dyn EntityExtractor>,
        embedder: Arc<dyn Embedder>,
        sink: Arc<dyn IndexSink>,
    ) -> Self {
        let prefix = config.storage.locator_prefix.as_str();
        let policy = config.pipeline.on_embedding_unavailable;
        Self {
            image: Arc::new(ArtifactPipeline::new(
                image_extractor,
                Arc::clone(&embedder),
                Arc::clone(&sink),
                prefix,
                policy,
            )),
            text: Arc::new(ArtifactPipeline::new(text_extractor, embedder, sink, prefix, policy)),
            image_batch_size: config.pipeline.image_batch_size,
            text_batch_size: config.pipeline.text_batch_size,
            limits: BatchLimits {
                task_timeout: config.pipeline.task_timeout(),
                batch_deadline: config.pipeline.batch_deadline(),
            },
        }
    }
}

/// Per-pipeline outcome.
#[derive(Debug)]
pub struct PipelineReport {
    pub pipeline: &'static str,
    pub attempted: usize,
    pub committed: usize,
    pub failed: usize,
    pub batches: usize,
    pub records: Vec<IngestRecord>,
    pub failures: Vec<ArtifactFailure>,
}

impl PipelineReport {
    pub fn print(&self) {
        println!("pipeline {}", self.pipeline);
        println!("  batches: {}", self.batches);
        println!("  attempted: {}", self.attempted);
        println!("  committed: {}", self.committed);
        println!("  failed: {}", self.failed);
        for failure in &self.failures {
            println!(
                "    {} ({}, {}): {}",
                failure.label, failure.stage, failure.kind, failure.message
            );
        }
    }
}

/// Which pipelines a run executes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Which {
    Images,
    Text,
    All,
}

async fn run_kind(
    name: &'static str,
    kind: ArtifactKind,
    worker: &Arc<ArtifactPipeline>,
    batch_size: usize,
    limits: BatchLimits,
    artifacts: Vec<Artifact>,
    progress: &dyn ProgressReporter,
) -> PipelineReport {
    let items: Vec<Artifact> = artifacts.into_iter().filter(|a| a.kind == kind).collect();
    info!(pipeline = name, artifacts = items.len(), batch_size, "pipeline started");

    let summary = run_batched(name, items, batch_size, Arc::clone(worker), limits, progress).await;

    let report = PipelineReport {
        pipeline: name,
        attempted: summary.attempted(),
        committed: summary.committed.len(),
        failed: summary.failed(),
        batches: summary.batches.len(),
        records: summary.committed,
        failures: summary.failures,
    };
    info!(
        pipeline = name,
        attempted = report.attempted,
        failed = report.failed,
        "pipeline finished"
    );
    report
}

/// Run the image artifacts among `artifacts`.
pub async fn run_image_pipeline(
    ctx: &PipelineContext,
    artifacts: Vec<Artifact>,
    progress: &dyn ProgressReporter,
) -> PipelineReport {
    run_kind(
        "images",
        ArtifactKind::Image,
        &ctx.image,
        ctx.image_batch_size,
        ctx.limits,
        artifacts,
        progress,
    )
    .await
}

/// Run the text artifacts among `artifacts`.
pub async fn run_text_pipeline(
    ctx: &PipelineContext,
    artifacts: Vec<Artifact>,
    progress: &dyn ProgressReporter,
) -> PipelineReport {
    run_kind(
        "text",
        ArtifactKind::Text,
        &ctx.text,
        ctx.text_batch_size,
        ctx.limits,
        artifacts,
        progress,
    )
    .await
}

/// Run the selected pipelines over an already acquired artifact set.
pub async fn run_with_context(
    ctx: &PipelineContext,
    artifacts: Vec<Artifact>,
    which: Which,
    progress: &dyn ProgressReporter,
) -> Vec<PipelineReport> {
    let mut reports = Vec::new();
    if matches!(which, Which::Images | Which::All) {
        reports.push(run_image_pipeline(ctx, artifacts.clone(), progress).await);
    }
    if matches!(which, Which::Text | Which::All) {
        reports.push(run_text_pipeline(ctx, artifacts, progress).await);
    }
    reports
}

/// `pingest run`: stage (optionally from S3), scan, enrich and ingest.
///
/// Returns `Err` only for run-level problems. Artifact failures are
/// reported, not raised.
pub async fn run(
    config: &Config,
    which: Which,
    fetch: bool,
    progress: &dyn ProgressReporter,
) -> Result<Vec<PipelineReport>> {
    let credentials = Credentials::from_env()?;
    let ctx = PipelineContext::build(config, credentials.clone())?;

    if fetch {
        let s3 = config
            .storage
            .s3
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--fetch requires a [storage.s3] section"))?;
        let http = RemoteClient::http_client(config.retry.request_timeout())?;
        let stage = S3Stage::new(s3, &config.aws.region, credentials, http)?;
        let staged = stage.fetch(&config.paths.staging_dir).await?;
        println!("staged {} files into {}", staged.len(), config.paths.staging_dir.display());
    }

    let artifacts = StagingDir::new(&config.paths.staging_dir).artifacts().await?;
    let reports = run_with_context(&ctx, artifacts, which, progress).await;
    for report in &reports {
        report.print();
    }
    println!("ok");
    Ok(reports)
}
