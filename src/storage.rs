//! Log artifact publishing
//!
//! The collector always leaves the artifact on local disk. A publisher
//! copies it somewhere the scheduling system can reach; a failed publish
//! is reported as a warning by the caller and never changes the outcome.

use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info, warn};

use crate::engine::CaseRoundIdentity;
use crate::error::PublishError;
use crate::output::{ArtifactRef, LogArtifact};

/// Destination for finished log artifacts
#[async_trait]
pub trait LogArtifactPublisher: Send + Sync {
    async fn publish(
        &self,
        artifact: &LogArtifact,
        identity: &CaseRoundIdentity,
    ) -> Result<ArtifactRef, PublishError>;
}

/// Object key of an artifact: `{taskId}/logs/{testCaseId}_{round}.log`
pub fn artifact_key(identity: &CaseRoundIdentity) -> String {
    format!("{}/logs/{}", identity.task_id, identity.log_file_name())
}

/// Publisher for this worker: MinIO when `MINIO_ENDPOINT` is set, local files otherwise
pub async fn publisher_from_env() -> Result<Box<dyn LogArtifactPublisher>> {
    if std::env::var("MINIO_ENDPOINT").is_err() {
        info!("MINIO_ENDPOINT not set, keeping log artifacts on local disk");
        return Ok(Box::new(LocalPublisher));
    }
    let storage = StorageClient::from_env().await?;
    info!("Publishing log artifacts to bucket {}", storage.bucket());
    Ok(Box::new(storage))
}

/// Publish `artifact`, falling back to its local file when the publisher fails.
///
/// Returns `None` only when the artifact is not even on local disk.
pub async fn publish_or_local(
    publisher: &dyn LogArtifactPublisher,
    artifact: &LogArtifact,
    identity: &CaseRoundIdentity,
) -> Option<ArtifactRef> {
    let err = match publisher.publish(artifact, identity).await {
        Ok(reference) => return Some(reference),
        Err(e) => e,
    };
    warn!("Failed to publish log artifact {}: {}", artifact.name, err);

    match LocalPublisher.publish(artifact, identity).await {
        Ok(reference) => Some(reference),
        Err(e) => {
            warn!("Log artifact {} is not available locally: {}", artifact.name, e);
            None
        }
    }
}

/// Keeps artifacts where the collector wrote them
#[derive(Debug, Clone, Default)]
pub struct LocalPublisher;

#[async_trait]
impl LogArtifactPublisher for LocalPublisher {
    async fn publish(
        &self,
        artifact: &LogArtifact,
        _identity: &CaseRoundIdentity,
    ) -> Result<ArtifactRef, PublishError> {
        tokio::fs::metadata(&artifact.path)
            .await
            .map_err(|source| PublishError::Read {
                path: artifact.path.clone(),
                source,
            })?;
        Ok(ArtifactRef::local(artifact))
    }
}

/// S3/MinIO storage client
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
}

impl StorageClient {
    /// Create a new storage client from environment variables
    pub async fn from_env() -> Result<Self> {
        let endpoint = std::env::var("MINIO_ENDPOINT").unwrap_or_else(|_| "localhost".into());
        let port = std::env::var("MINIO_PORT").unwrap_or_else(|_| "9000".into());
        let access_key = std::env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".into());
        let secret_key = std::env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".into());
        let bucket = std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "case-logs".into());
        let use_ssl = std::env::var("MINIO_USE_SSL")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let protocol = if use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, endpoint, port);

        info!("Connecting to MinIO at {}", endpoint_url);

        let credentials = Credentials::new(access_key, secret_key, None, None, "minio");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(config);

        Ok(Self { client, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload bytes to S3/MinIO
    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/plain; charset=utf-8")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| PublishError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl LogArtifactPublisher for StorageClient {
    async fn publish(
        &self,
        artifact: &LogArtifact,
        identity: &CaseRoundIdentity,
    ) -> Result<ArtifactRef, PublishError> {
        let data = tokio::fs::read(&artifact.path)
            .await
            .map_err(|source| PublishError::Read {
                path: artifact.path.clone(),
                source,
            })?;

        let key = artifact_key(identity);
        let size = data.len();
        self.upload(&key, data).await?;
        debug!("Uploaded {} ({} bytes) to {}", artifact.name, size, key);

        Ok(ArtifactRef {
            name: artifact.name.clone(),
            location: key,
            truncated: artifact.truncated(),
        })
    }
}
