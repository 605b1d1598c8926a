//! Index delivery and the local audit trail.
//!
//! [`IngestionClient`] writes the audit copy of a record to
//! `<audit_dir>/<stem>.json`, then POSTs the record as a one-element JSON
//! array to the index endpoint with a SigV4 signature, so the endpoint has to
//! accept batch bodies (an ingestion pipeline path, not `_doc`). The audit copy is
//! written whether or not the POST succeeds; the response body is returned
//! as an opaque [`IngestAck`].

use async_trait::async_trait;
use reqwest::Url;
use std::path::PathBuf;
use tracing::debug;

use crate::error::IngestError;
use crate::models::{Artifact, AuditRecord, IngestAck, IngestRecord};
use crate::remote::{RemoteClient, RemoteFailure};

/// Stage contract for delivering an assembled record.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn ingest(&self, artifact: &Artifact, record: &IngestRecord)
        -> Result<IngestAck, IngestError>;
}

/// Directory of per-artifact audit JSON files.
#[derive(Debug, Clone)]
pub struct AuditStore {
    dir: PathBuf,
}

impl AuditStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, artifact: &Artifact) -> PathBuf {
        self.dir.join(format!("{}.json", artifact.stem))
    }

    /// Write (or overwrite) the audit copy for `artifact`.
    pub async fn write(
        &self,
        artifact: &Artifact,
        record: &IngestRecord,
    ) -> Result<PathBuf, IngestError> {
        let path = self.path_for(artifact);
        let audit = AuditRecord::new(artifact, record);
        let json = serde_json::to_vec_pretty(&audit)?;

        let io_err = |source| IngestError::Audit {
            path: path.display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(&path, json).await.map_err(io_err)?;
        Ok(path)
    }
}

/// Signed HTTP delivery to the search index plus the local audit copy.
pub struct IngestionClient {
    remote: RemoteClient,
    endpoint: Url,
    audit: AuditStore,
}

impl IngestionClient {
    pub fn new(remote: RemoteClient, endpoint: &str, audit: AuditStore) -> anyhow::Result<Self> {
        Ok(Self {
            remote,
            endpoint: Url::parse(endpoint)?,
            audit,
        })
    }
}

/// Serialize a record as the single-element batch the index expects.
pub fn batch_body(record: &IngestRecord) -> Result<Vec<u8>, IngestError> {
    Ok(serde_json::to_vec(std::slice::from_ref(record))?)
}

#[async_trait]
impl IndexSink for IngestionClient {
    async fn ingest(
        &self,
        artifact: &Artifact,
        record: &IngestRecord,
    ) -> Result<IngestAck, IngestError> {
        let audit_result = self.audit.write(artifact, record).await;

        let body = batch_body(record)?;
        let post_result = self
            .remote
            .post_json(&self.endpoint, &body)
            .await
            .map_err(|failure| match failure {
                RemoteFailure::Transport(msg) => IngestError::Transport(msg),
                RemoteFailure::Status { status, body } => IngestError::Status { status, body },
            });

        let audit_path = audit_result?;
        let ack = post_result?;
        debug!(artifact = %artifact.stem, audit = %audit_path.display(), "record ingested");
        Ok(IngestAck(ack))
    }
}
