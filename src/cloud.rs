//! S3-compatible object storage adapter.

use std::fs::File;
use std::io::{Read, Write};

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use camino::Utf8Path;
use tokio::runtime::Runtime;
use tracing::{error, info, instrument, warn};

use crate::config::CloudConfig;
use crate::error::MidfileError;
use crate::fs_util::ensure_parent_dir;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Files at or above this size are uploaded in parts.
const MULTIPART_THRESHOLD: u64 = 64 * 1024 * 1024;
/// Well above the 5 MiB S3 minimum for every part but the last.
const MIN_PART_SIZE: u64 = 16 * 1024 * 1024;
const MAX_PARTS: u64 = 10_000;

pub trait CloudStore {
    /// Probes for an object without reading its payload.
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, MidfileError>;
    fn upload(&self, bucket: &str, local_path: &Utf8Path, key: &str) -> Result<(), MidfileError>;
    fn download(&self, bucket: &str, key: &str, destination: &Utf8Path)
    -> Result<(), MidfileError>;
}

/// Blocking S3 client for an explicitly configured endpoint.
pub struct S3CloudStore {
    client: Client,
    runtime: Runtime,
    endpoint: String,
}

impl std::fmt::Debug for S3CloudStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3CloudStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3CloudStore {
    pub fn from_config(config: &CloudConfig) -> Result<Self, MidfileError> {
        let access_key = required(&config.access_key, "access_key")?;
        let secret_key = required(&config.secret_key, "secret_key")?;
        let endpoint = normalize_endpoint(&required(&config.endpoint, "endpoint")?);
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let credentials = Credentials::new(access_key, secret_key, None, None, "midfile-config");
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(config.force_path_style)
            .build();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                error!(error = %err, "failed to create cloud client");
                MidfileError::Cloud(err.to_string())
            })?;

        Ok(Self {
            client: Client::from_conf(s3_config),
            runtime,
            endpoint,
        })
    }

    async fn put_single(&self, bucket: &str, local_path: &Utf8Path, key: &str) -> Result<(), MidfileError> {
        let body = ByteStream::from_path(local_path.as_std_path())
            .await
            .map_err(|err| MidfileError::Filesystem(format!("read {local_path}: {err}")))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| sdk_error("put object", err))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        local_path: &Utf8Path,
        key: &str,
        size: u64,
    ) -> Result<(), MidfileError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| sdk_error("create multipart upload", err))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| MidfileError::Cloud("multipart upload returned no id".to_string()))?
            .to_string();

        let result = self
            .upload_parts(bucket, local_path, key, &upload_id, part_size(size))
            .await;
        match result {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|err| sdk_error("complete multipart upload", err))?;
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key,
                        error = %DisplayErrorContext(&abort_err),
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        local_path: &Utf8Path,
        key: &str,
        upload_id: &str,
        part_size: u64,
    ) -> Result<Vec<CompletedPart>, MidfileError> {
        let mut file = File::open(local_path.as_std_path())
            .map_err(|err| MidfileError::Filesystem(format!("open {local_path}: {err}")))?;
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        loop {
            let mut chunk = Vec::with_capacity(part_size as usize);
            (&mut file)
                .take(part_size)
                .read_to_end(&mut chunk)
                .map_err(|err| MidfileError::Filesystem(format!("read {local_path}: {err}")))?;
            if chunk.is_empty() {
                break;
            }
            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|err| sdk_error("upload part", err))?;
            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
        }
        Ok(parts)
    }
}

impl CloudStore for S3CloudStore {
    #[instrument(skip(self), fields(backend = "s3"))]
    fn exists(&self, bucket: &str, key: &str) -> Result<bool, MidfileError> {
        self.runtime.block_on(async {
            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(err) => {
                    if let SdkError::ServiceError(ref service_err) = err
                        && service_err.raw().status().as_u16() == 404
                    {
                        return Ok(false);
                    }
                    Err(sdk_error("head object", err))
                }
            }
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    fn upload(&self, bucket: &str, local_path: &Utf8Path, key: &str) -> Result<(), MidfileError> {
        let metadata = std::fs::metadata(local_path.as_std_path())
            .ok()
            .filter(|meta| meta.is_file())
            .ok_or_else(|| MidfileError::LocalFileMissing(local_path.to_path_buf()))?;

        self.runtime.block_on(async {
            if metadata.len() >= MULTIPART_THRESHOLD {
                self.put_multipart(bucket, local_path, key, metadata.len())
                    .await
            } else {
                self.put_single(bucket, local_path, key).await
            }
        })?;
        info!("{local_path} upload to {bucket}/{key} finished");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    fn download(
        &self,
        bucket: &str,
        key: &str,
        destination: &Utf8Path,
    ) -> Result<(), MidfileError> {
        let started = chrono::Local::now();
        info!("download start: {}", started.format("%Y-%m-%d %H:%M:%S"));
        ensure_parent_dir(destination).inspect_err(|err| {
            error!(error = %err, "failed to create output directory");
        })?;
        let dir = destination
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".midfile-download")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| MidfileError::Filesystem(err.to_string()))?;

        self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    if let SdkError::ServiceError(ref service_err) = err
                        && service_err.raw().status().as_u16() == 404
                    {
                        return MidfileError::CloudObjectNotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        };
                    }
                    sdk_error("get object", err)
                })?;
            let mut body = output.body;
            while let Some(chunk) = body.try_next().await.map_err(|err| {
                error!(error = %err, "object download interrupted");
                MidfileError::Cloud(err.to_string())
            })? {
                temp.write_all(&chunk)
                    .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
            }
            Ok::<_, MidfileError>(())
        })?;

        temp.persist(destination.as_std_path())
            .map_err(|err| MidfileError::Filesystem(err.to_string()))?;
        let finished = chrono::Local::now();
        info!(
            elapsed_ms = (finished - started).num_milliseconds(),
            "download finished: {}",
            finished.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, MidfileError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MidfileError::CloudConfig(format!("missing cloud.{name}")))
}

/// Bare `host:port` endpoints are treated as plain HTTP.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn part_size(total: u64) -> u64 {
    MIN_PART_SIZE.max(total.div_ceil(MAX_PARTS))
}

fn sdk_error<E>(action: &str, err: SdkError<E>) -> MidfileError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = format!("{action}: {}", DisplayErrorContext(&err));
    error!("{message}");
    MidfileError::Cloud(message)
}
