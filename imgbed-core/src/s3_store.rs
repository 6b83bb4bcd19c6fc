use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::{primitives::ByteStream as AwsByteStream, Client};
use bytes::Bytes;
use chrono::DateTime;
use tracing::debug;

use crate::store::join_url;
use crate::{ImgbedError, ImgbedResult, ObjectInfo, PutResult, RemoteKey, StorageClient, StorageConfig};

/// Page size used when listing without a limit
const LIST_PAGE_SIZE: i32 = 1000;

/// S3-compatible object store (AWS S3, Aliyun OSS, MinIO, R2, ...) using the AWS SDK
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3Store {
    /// Build a client for the configured endpoint and bucket
    pub async fn connect(config: &StorageConfig) -> ImgbedResult<Self> {
        if config.bucket_name.is_empty() {
            return Err(ImgbedError::config("bucket name is required"));
        }

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.access_key_secret.clone(),
            None,
            None,
            "imgbed",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.signing_region()))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url())
            .load()
            .await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        );

        let public_base = if config.force_path_style {
            join_url(&config.endpoint_url(), &config.bucket_name)
        } else {
            format!("https://{}.{}", config.bucket_name, config.endpoint_host())
        };

        Ok(Self {
            client,
            bucket: config.bucket_name.clone(),
            public_base,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Map an SDK failure to a provider error carrying the service error code
fn map_sdk_error<E>(err: SdkError<E>) -> ImgbedError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = match &err {
        SdkError::TimeoutError(_) => "Timeout".to_string(),
        SdkError::DispatchFailure(_) => "DispatchFailure".to_string(),
        _ => err.code().unwrap_or("Unknown").to_string(),
    };
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    ImgbedError::provider(code, message)
}

#[async_trait]
impl StorageClient for S3Store {
    async fn put(
        &self,
        key: &RemoteKey,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ImgbedResult<PutResult> {
        let size_bytes = body.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(AwsByteStream::from(body));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let result = request.send().await.map_err(map_sdk_error)?;
        debug!(key = %key, size_bytes, "object stored");

        Ok(PutResult {
            url: self.public_url(key.as_str()),
            etag: result.e_tag,
            size_bytes,
        })
    }

    async fn get(&self, key: &str) -> ImgbedResult<Option<Bytes>> {
        let result = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(result) => result,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                return Ok(None);
            }
            Err(err) => return Err(map_sdk_error(err)),
        };

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| ImgbedError::provider("ReadBody", e.to_string()))?;
        Ok(Some(body.into_bytes()))
    }

    async fn delete(&self, key: &str) -> ImgbedResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                return Ok(false);
            }
            Err(err) => return Err(map_sdk_error(err)),
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(true)
    }

    async fn list(&self, prefix: Option<&str>, limit: Option<usize>) -> ImgbedResult<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let remaining = limit.map(|l| l.saturating_sub(objects.len()));
            if remaining == Some(0) {
                break;
            }

            let page_size = remaining
                .map(|r| r.min(LIST_PAGE_SIZE as usize) as i32)
                .unwrap_or(LIST_PAGE_SIZE);

            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .max_keys(page_size);

            if let Some(prefix) = prefix {
                request = request.prefix(prefix);
            }
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let result = request.send().await.map_err(map_sdk_error)?;

            for object in result.contents.unwrap_or_default() {
                if let Some(key) = object.key {
                    objects.push(ObjectInfo {
                        url: self.public_url(&key),
                        size_bytes: object.size.unwrap_or(0).max(0) as u64,
                        last_modified: object
                            .last_modified
                            .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
                        key,
                    });
                }
            }

            match (result.is_truncated, result.next_continuation_token) {
                (Some(true), Some(token)) => continuation = Some(token),
                _ => break,
            }
        }

        if let Some(limit) = limit {
            objects.truncate(limit);
        }
        Ok(objects)
    }

    async fn check(&self) -> ImgbedResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_base, key)
    }
}
