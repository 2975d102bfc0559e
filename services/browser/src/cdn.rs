use crate::config::CdnConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument};

/// Object fetched from the CDN bucket
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Read-only source of frame objects keyed by flat frame key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn fetch_object(&self, key: &str) -> Result<Option<FetchedObject>>;
}

/// Frame objects in an S3-compatible bucket (DigitalOcean Spaces, MinIO)
pub struct S3ObjectSource {
    client: S3Client,
    bucket: String,
}

impl S3ObjectSource {
    pub async fn new(config: &CdnConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Required for MinIO
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "CDN object source initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    #[instrument(skip(self))]
    async fn fetch_object(&self, key: &str) -> Result<Option<FetchedObject>> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    debug!(key, "CDN object not found");
                    return Ok(None);
                }
                return Err(e).context("Failed to fetch object from CDN");
            }
        };

        let content_type = output.content_type().map(String::from);
        let bytes = output
            .body
            .collect()
            .await
            .context("Failed to read CDN object body")?
            .into_bytes()
            .to_vec();

        debug!(key, size_bytes = bytes.len(), "Fetched object from CDN");

        Ok(Some(FetchedObject {
            bytes,
            content_type,
        }))
    }
}
