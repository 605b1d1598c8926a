//! Artifact acquisition.
//!
//! [`StagingDir`] turns the local staging directory into [`Artifact`]s:
//! it walks the directory, classifies each file by extension, reads text
//! pages into memory, and orders the result by kind, page number and name.
//!
//! [`S3Stage`] fills the staging directory from an S3 prefix first. It lists
//! the bucket with `ListObjectsV2` (following continuation tokens), keeps
//! keys matching `include_globs`, and downloads each object with a SigV4
//! signed GET. Custom endpoints (MinIO, LocalStack) are addressed
//! path-style: `{endpoint_url}/{bucket}/{key}`.
//!
//! ```toml
//! [storage.s3]
//! bucket = "acme-docs"
//! prefix = "reports/q3/pages/"
//! include_globs = ["**/image_*", "**/text_*"]
//! # endpoint_url = "http://localhost:9000"
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use reqwest::Url;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::S3StageConfig;
use crate::models::{Artifact, ArtifactKind};
use crate::sigv4::{uri_encode, Credentials, SigV4Signer};

/// Produces the artifact set for a run.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn artifacts(&self) -> Result<Vec<Artifact>>;
}

/// Local directory of staged page files.
pub struct StagingDir {
    root: PathBuf,
}

impl StagingDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Synchronous scan; also used by `pingest check`.
    pub fn scan(&self) -> Result<Vec<Artifact>> {
        if !self.root.is_dir() {
            bail!("Staging directory does not exist: {}", self.root.display());
        }

        let mut artifacts = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.with_context(|| {
                format!("Failed to read staging directory {}", self.root.display())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();

            match ArtifactKind::from_extension(&ext) {
                Some(ArtifactKind::Image) => artifacts.push(Artifact::image(path)),
                Some(ArtifactKind::Text) => {
                    let bytes = std::fs::read(path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let text = String::from_utf8_lossy(&bytes).to_string();
                    artifacts.push(Artifact::text(path, text));
                }
                None => {
                    warn!(path = %path.display(), "skipping file with unsupported extension");
                }
            }
        }

        artifacts.sort_by(compare_artifacts);
        debug!(root = %self.root.display(), count = artifacts.len(), "staging directory scanned");
        Ok(artifacts)
    }
}

#[async_trait]
impl ArtifactSource for StagingDir {
    async fn artifacts(&self) -> Result<Vec<Artifact>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || StagingDir::new(root).scan())
            .await
            .context("Staging directory scan panicked")?
    }
}

/// Kind first, then numeric page number (unnumbered last), then name.
fn compare_artifacts(a: &Artifact, b: &Artifact) -> Ordering {
    let page = |x: &Artifact| x.page_number().and_then(|p| p.parse::<u64>().ok());
    let kind = |x: &Artifact| x.kind.as_str();
    kind(a)
        .cmp(kind(b))
        .then_with(|| match (page(a), page(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.file_name.cmp(&b.file_name))
}

// ============ S3 staging ============

/// One `<Contents>` entry of a `ListObjectsV2` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub key: String,
    pub size: i64,
}

/// Downloads page files from S3 into the staging directory.
pub struct S3Stage {
    config: S3StageConfig,
    base: String,
    http: reqwest::Client,
    signer: SigV4Signer,
    include: GlobSet,
}

impl S3Stage {
    pub fn new(
        config: S3StageConfig,
        default_region: &str,
        credentials: Credentials,
        http: reqwest::Client,
    ) -> Result<Self> {
        let region = config.region.as_deref().unwrap_or(default_region);
        let base = match &config.endpoint_url {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, region),
        };
        let include = build_globset(&config.include_globs)?;
        Ok(Self {
            signer: SigV4Signer::new(credentials, region, "s3"),
            config,
            base,
            http,
            include,
        })
    }

    /// List, filter and download into `staging_dir`. Returns the local paths.
    pub async fn fetch(&self, staging_dir: &Path) -> Result<Vec<PathBuf>> {
        let objects = self.list_objects().await?;
        tokio::fs::create_dir_all(staging_dir)
            .await
            .with_context(|| format!("Failed to create {}", staging_dir.display()))?;

        let mut paths = Vec::new();
        let mut staged_names = HashSet::new();
        let mut staged_bytes: u64 = 0;
        for obj in &objects {
            let rel_key = self.relative_key(&obj.key);
            if !self.include.is_match(&rel_key) {
                continue;
            }
            let file_name = obj.key.rsplit('/').next().unwrap_or(&obj.key);
            let ext = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
            if ArtifactKind::from_extension(ext).is_none() {
                warn!(key = %obj.key, "skipping object with unsupported extension");
                continue;
            }
            // Staging is flat; the first key wins a file name.
            if !staged_names.insert(file_name.to_string()) {
                warn!(key = %obj.key, file_name, "skipping object whose file name is already staged");
                continue;
            }

            let bytes = match self.download_object(&obj.key).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(bucket = %self.config.bucket, key = %obj.key, error = %e, "download failed");
                    continue;
                }
            };
            let path = staging_dir.join(file_name);
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            paths.push(path);
            staged_bytes += u64::try_from(obj.size).unwrap_or(0);
        }

        info!(
            bucket = %self.config.bucket,
            prefix = %self.config.prefix,
            listed = objects.len(),
            staged = paths.len(),
            bytes = staged_bytes,
            "s3 staging complete"
        );
        Ok(paths)
    }

    fn relative_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            return key.to_string();
        }
        let prefix = self.config.prefix.trim_end_matches('/');
        key.strip_prefix(prefix)
            .map(|s| s.trim_start_matches('/').to_string())
            .unwrap_or_else(|| key.to_string())
    }

    async fn list_objects(&self) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut url = Url::parse(&format!("{}/", self.base))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("list-type", "2");
                query.append_pair("max-keys", "1000");
                if !self.config.prefix.is_empty() {
                    query.append_pair("prefix", &self.config.prefix);
                }
                if let Some(ref token) = continuation_token {
                    query.append_pair("continuation-token", token);
                }
            }

            let resp = self
                .signer
                .apply(self.http.get(url.clone()), "GET", &url, b"")
                .send()
                .await
                .with_context(|| {
                    format!(
                        "Failed to list S3 objects in s3://{}/{}",
                        self.config.bucket, self.config.prefix
                    )
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            objects.extend(batch);

            match (is_truncated, next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn download_object(&self, key: &str) -> Result<Vec<u8>> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let url = Url::parse(&format!("{}/{}", self.base, encoded_key))?;

        let resp = self
            .signer
            .apply(self.http.get(url.clone()), "GET", &url, b"")
            .send()
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.config.bucket, key))?;

        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), key);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Parse a `ListObjectsV2` body into objects, the truncation flag and the
/// next continuation token. Directory placeholder keys are skipped.
pub fn parse_list_objects_response(xml: &str) -> (Vec<S3Object>, bool, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated").as_deref() == Some("true");
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let objects = xml
        .split("<Contents>")
        .skip(1)
        .filter_map(|chunk| chunk.split_once("</Contents>").map(|(block, _)| block))
        .filter_map(|block| {
            let key = extract_xml_value(block, "Key")?;
            if key.is_empty() || key.ends_with('/') {
                return None;
            }
            let size = extract_xml_value(block, "Size")
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            Some(S3Object {
                key: unescape_xml(&key),
                size,
            })
        })
        .collect();

    (objects, is_truncated, next_token.map(|t| unescape_xml(&t)))
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentHandle;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn scan_classifies_and_orders() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("text_10.txt"), "Ten").unwrap();
        fs::write(tmp.path().join("text_2.txt"), "Two").unwrap();
        fs::write(tmp.path().join("image_3.PNG"), [0u8; 4]).unwrap();
        fs::write(tmp.path().join("image_1.jpg"), [0u8; 4]).unwrap();
        fs::write(tmp.path().join("manifest.csv"), "x").unwrap();

        let artifacts = StagingDir::new(tmp.path()).scan().unwrap();
        let names: Vec<&str> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, vec!["image_1.jpg", "image_3.PNG", "text_2.txt", "text_10.txt"]);

        assert_eq!(artifacts[0].kind, ArtifactKind::Image);
        assert_eq!(artifacts[2].content, ContentHandle::Text("Two".into()));
        assert_eq!(artifacts[3].page_number(), Some("10"));
    }

    #[test]
    fn unnumbered_files_sort_last() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("text_notes.txt"), "n").unwrap();
        fs::write(tmp.path().join("text_1.txt"), "1").unwrap();

        let artifacts = StagingDir::new(tmp.path()).scan().unwrap();
        assert_eq!(artifacts[0].file_name, "text_1.txt");
        assert_eq!(artifacts[1].file_name, "text_notes.txt");
    }

    #[test]
    fn missing_staging_dir_is_fatal() {
        let err = StagingDir::new("/nonexistent/staging").scan().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn artifacts_scan_off_the_runtime() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("text_1.txt"), "Acme").unwrap();
        fs::write(tmp.path().join("image_1.png"), [0u8; 4]).unwrap();

        let source: Box<dyn ArtifactSource> = Box::new(StagingDir::new(tmp.path()));
        let artifacts = source.artifacts().await.unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].kind, ArtifactKind::Image);

        let missing = StagingDir::new(tmp.path().join("absent"));
        let err = missing.artifacts().await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn list_response_parsing() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok&amp;1</NextContinuationToken>
  <Contents><Key>pages/</Key><Size>0</Size></Contents>
  <Contents><Key>pages/image_1.png</Key><Size>2048</Size></Contents>
  <Contents><Key>pages/Q&amp;A text_2.txt</Key><Size>12</Size></Contents>
</ListBucketResult>"#;

        let (objects, truncated, token) = parse_list_objects_response(xml);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("tok&1"));
        assert_eq!(
            objects,
            vec![
                S3Object {
                    key: "pages/image_1.png".into(),
                    size: 2048
                },
                S3Object {
                    key: "pages/Q&A text_2.txt".into(),
                    size: 12
                },
            ]
        );
    }

    #[test]
    fn empty_listing() {
        let (objects, truncated, token) =
            parse_list_objects_response("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>");
        assert!(objects.is_empty());
        assert!(!truncated);
        assert!(token.is_none());
    }
}
