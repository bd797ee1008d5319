//! S3-compatible object store (AWS S3, Cloudflare R2, MinIO).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use chrono::{DateTime, Utc};
use keystash_core::{CacheObject, Error, ObjectMetadata, ObjectStore, Result, UploadOutcome};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Settings {
    /// Region; the SDK default chain applies when unset.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for R2, MinIO and similar services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Use path-style addressing (`endpoint/bucket/key`).
    #[serde(default)]
    pub force_path_style: bool,
}

pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Build a client from the default credential chain plus `settings`.
    pub async fn new(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }
}

fn to_chrono(timestamp: Option<&SmithyDateTime>) -> DateTime<Utc> {
    timestamp
        .and_then(|dt| dt.to_millis().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_default()
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, bucket: &str, name: &str) -> Result<Option<CacheObject>> {
        match self.client.head_object().bucket(bucket).key(name).send().await {
            Ok(output) => Ok(Some(CacheObject {
                name: name.to_string(),
                last_updated: to_chrono(output.last_modified()),
                size_bytes: output.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(Error::Resolution(format!(
                        "HEAD s3://{}/{} failed: {}",
                        bucket, name, service_err
                    )))
                }
            }
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<CacheObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|err| {
                Error::Resolution(format!(
                    "LIST s3://{}/{} failed: {}",
                    bucket,
                    prefix,
                    err.into_service_error()
                ))
            })?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                objects.push(CacheObject {
                    name: key.to_string(),
                    last_updated: to_chrono(obj.last_modified()),
                    size_bytes: obj.size().unwrap_or(0).max(0) as u64,
                });
            }

            match (response.is_truncated(), response.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn metadata(&self, bucket: &str, name: &str) -> Result<Option<ObjectMetadata>> {
        match self.client.head_object().bucket(bucket).key(name).send().await {
            Ok(output) => Ok(Some(ObjectMetadata::from(
                output.metadata().cloned().unwrap_or_default(),
            ))),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(Error::Resolution(format!(
                        "HEAD s3://{}/{} failed: {}",
                        bucket, name, service_err
                    )))
                }
            }
        }
    }

    async fn download(&self, bucket: &str, name: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| {
                Error::download(format!(
                    "GET s3://{}/{} failed: {}",
                    bucket,
                    name,
                    err.into_service_error()
                ))
            })?;

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            Error::download(format!("Failed to create {}: {}", dest.display(), e))
        })?;

        let mut body = response.body.into_async_read();
        let bytes = tokio::io::copy(&mut body, &mut file).await.map_err(|e| {
            Error::download(format!("Failed to stream s3://{}/{}: {}", bucket, name, e))
        })?;
        file.flush()
            .await
            .map_err(|e| Error::download(format!("Failed to flush {}: {}", dest.display(), e)))?;

        debug!(bucket, name, bytes, "Downloaded object");
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        src: &Path,
        name: &str,
        metadata: &ObjectMetadata,
    ) -> Result<UploadOutcome> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| Error::upload(format!("Failed to read {}: {}", src.display(), e)))?;

        // If-None-Match makes the write create-if-absent on stores that
        // support conditional writes.
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(name)
            .content_type("application/x-tar")
            .if_none_match("*")
            .body(body);
        for (k, v) in metadata.iter() {
            request = request.metadata(k, v);
        }

        match request.send().await {
            Ok(_) => Ok(UploadOutcome::Stored),
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                if matches!(status, Some(412) | Some(409)) {
                    debug!(bucket, name, ?status, "Conditional write lost the race");
                    return Ok(UploadOutcome::AlreadyExists);
                }
                Err(Error::upload(format!(
                    "PUT s3://{}/{} failed: {}",
                    bucket,
                    name,
                    err.into_service_error()
                )))
            }
        }
    }
}
