//! S3 Store Module
//!
//! `ObjectStore` implementation for S3-compatible storage services, plus the
//! bucket helpers used by the command line (listing, website setup).
//! Supports multiple providers including:
//! - AWS S3
//! - Backblaze B2
//! - Cloudflare R2
//! - Any other S3-compatible service
//!
//! Uploads above the multipart threshold are sent as multipart uploads whose
//! parts are exactly `chunk_size` bytes, so the ETag S3 assigns matches the
//! local fingerprint.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart, CreateBucketConfiguration,
    ErrorDocument, IndexDocument, WebsiteConfiguration,
};
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{S3Config, TransferConfig};
use crate::error::SyncError;
use crate::manifest::list_all_objects;
use crate::store::{ObjectPage, ObjectStore, RemoteObject, UploadRequest};

/// S3 rejects multipart uploads with more parts than this
pub const MAX_PARTS: u64 = 10_000;

/// Region used when neither the config nor the environment provides one
const FALLBACK_REGION: &str = "us-east-1";

/// Regions whose website endpoint uses `s3-website-<region>` instead of `s3-website.<region>`
const DASH_WEBSITE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "eu-west-1",
    "sa-east-1",
];

/// S3 provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3Provider {
    /// Amazon Web Services S3
    AwsS3,
    /// Backblaze B2
    BackblazeB2,
    /// Cloudflare R2
    CloudflareR2,
    /// Generic S3-compatible service
    Generic,
}

impl S3Provider {
    /// Parse provider from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "aws" | "s3" | "aws-s3" => S3Provider::AwsS3,
            "b2" | "backblaze" | "backblaze-b2" => S3Provider::BackblazeB2,
            "r2" | "cloudflare" | "cloudflare-r2" => S3Provider::CloudflareR2,
            _ => S3Provider::Generic,
        }
    }
}

/// S3-compatible object store
pub struct S3Store {
    client: S3Client,
    config: S3Config,
    region: String,
}

impl S3Store {
    /// Create a new S3Store instance
    ///
    /// # Arguments
    /// * `config` - S3 configuration including endpoint and optional static credentials
    pub async fn new(config: S3Config) -> Result<Self> {
        let (client, region) = Self::create_client(&config)
            .await
            .context("Failed to create S3 client")?;

        Ok(Self {
            client,
            config,
            region,
        })
    }

    /// Create S3 client with custom configuration
    async fn create_client(config: &S3Config) -> Result<(S3Client, String)> {
        let provider = S3Provider::parse(&config.provider);

        let region_provider = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(FALLBACK_REGION));

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials = Credentials::new(
                    access_key_id,
                    secret_access_key,
                    None, // session token
                    None, // expiration
                    "websync-config",
                );
                loader = loader.credentials_provider(credentials);
            }
            (None, None) => debug!("Using default AWS credential chain"),
            _ => bail!("Both access_key_id and secret_access_key must be set, or neither"),
        }

        let aws_config = loader.load().await;
        let region = aws_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| FALLBACK_REGION.to_string());

        // Build S3 config with custom endpoint if provided
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(config.force_path_style.unwrap_or(true));
        } else {
            match provider {
                S3Provider::AwsS3 => {
                    s3_config_builder =
                        s3_config_builder.force_path_style(config.force_path_style.unwrap_or(false));
                }
                S3Provider::BackblazeB2 => {
                    bail!("Backblaze B2 requires an endpoint URL (e.g., https://s3.us-west-002.backblazeb2.com)");
                }
                S3Provider::CloudflareR2 => {
                    bail!("Cloudflare R2 requires an endpoint URL (e.g., https://<account-id>.r2.cloudflarestorage.com)");
                }
                S3Provider::Generic => {
                    warn!("Generic S3 provider without endpoint - will use AWS S3");
                }
            }
        }

        let client = S3Client::from_conf(s3_config_builder.build());
        Ok((client, region))
    }

    /// Get provider type
    pub fn provider(&self) -> S3Provider {
        S3Provider::parse(&self.config.provider)
    }

    /// Region the client resolved to
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Public URL of the bucket's static website
    pub fn website_url(&self, bucket: &str) -> String {
        website_url(bucket, &self.region, self.config.endpoint.as_deref())
    }

    /// List the names of all buckets visible to the credentials
    pub async fn list_buckets(&self) -> Result<Vec<String>> {
        debug!("Listing buckets");

        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .context("Failed to list buckets")?;

        let names: Vec<String> = response
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(|n| n.to_string()))
            .collect();

        debug!("Found {} buckets", names.len());
        Ok(names)
    }

    /// List every object in a bucket, following pagination
    pub async fn list_bucket_objects(&self, bucket: &str) -> Result<Vec<RemoteObject>> {
        info!("Listing all objects in s3://{}", bucket);
        let objects = list_all_objects(self, bucket).await?;
        info!("Found {} total objects in s3://{}", objects.len(), bucket);
        Ok(objects)
    }

    /// Create a bucket (if needed) and configure it for static website hosting
    ///
    /// A bucket already owned by the caller is reused. The website serves
    /// `index.html` as index document and `error.html` as error document.
    pub async fn setup_bucket(&self, bucket: &str) -> Result<()> {
        self.create_bucket(bucket).await?;
        self.configure_website(bucket).await?;
        info!("Bucket {} is ready: {}", bucket, self.website_url(bucket));
        Ok(())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        info!("Creating bucket s3://{} in {}", bucket, self.region);

        let mut request = self.client.create_bucket().bucket(bucket);

        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" && self.config.endpoint.is_none() {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            Err(e)
                if e.as_service_error()
                    .map(|se| se.is_bucket_already_owned_by_you())
                    .unwrap_or(false) =>
            {
                info!("Bucket {} already exists and is owned by you", bucket);
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to create bucket: {}", bucket))),
        }
    }

    async fn configure_website(&self, bucket: &str) -> Result<()> {
        debug!("Configuring static website hosting for {}", bucket);

        let website = WebsiteConfiguration::builder()
            .index_document(
                IndexDocument::builder()
                    .suffix("index.html")
                    .build()
                    .context("Failed to build index document")?,
            )
            .error_document(
                ErrorDocument::builder()
                    .key("error.html")
                    .build()
                    .context("Failed to build error document")?,
            )
            .build();

        self.client
            .put_bucket_website()
            .bucket(bucket)
            .website_configuration(website)
            .send()
            .await
            .context(format!("Failed to configure website hosting for bucket: {}", bucket))?;

        Ok(())
    }

    /// Upload a file with a single PUT
    ///
    /// Sends exactly the `request.size` bytes that were fingerprinted.
    async fn put_single(&self, request: &UploadRequest) -> Result<()> {
        let body = part_body(&request.local_path, 0, request.size).await?;

        let response = self
            .client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .body(body)
            .send()
            .await
            .context(format!("Failed to upload file to S3: {}", request.key))?;

        debug!(
            "Uploaded {} (ETag: {})",
            request.key,
            response.e_tag().unwrap_or("unknown")
        );
        Ok(())
    }

    /// Upload a file as a multipart upload with `chunk_size` parts
    async fn put_multipart(&self, request: &UploadRequest) -> Result<()> {
        let chunk_size = request.transfer.chunk_size;
        let part_count = request.transfer.part_count(request.size);
        if part_count > MAX_PARTS {
            bail!(
                "{} needs {} parts of {} bytes, S3 allows at most {}",
                request.key,
                part_count,
                chunk_size,
                MAX_PARTS
            );
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .send()
            .await
            .context(format!("Failed to create multipart upload: {}", request.key))?;

        let upload_id = created
            .upload_id()
            .context("S3 did not return an upload id")?
            .to_string();

        debug!("Created multipart upload for {} ({} parts): {}", request.key, part_count, upload_id);

        match self.upload_parts(request, &upload_id, part_count).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                let response = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&request.bucket)
                    .key(&request.key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .context(format!("Failed to complete multipart upload: {}", request.key))?;

                debug!(
                    "Completed multipart upload {} (ETag: {})",
                    request.key,
                    response.e_tag().unwrap_or("unknown")
                );
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&request.bucket)
                    .key(&request.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
                }
                Err(e)
            }
        }
    }

    /// Upload the parts of a file in order and return them for completion
    async fn upload_parts(
        &self,
        request: &UploadRequest,
        upload_id: &str,
        part_count: u64,
    ) -> Result<Vec<CompletedPart>> {
        let chunk_size = request.transfer.chunk_size;
        let mut parts = Vec::with_capacity(part_count as usize);

        for index in 0..part_count {
            let offset = index * chunk_size;
            let length = chunk_size.min(request.size - offset);
            let part_number = (index + 1) as i32;

            let body = part_body(&request.local_path, offset, length).await?;

            let response = self
                .client
                .upload_part()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(length as i64)
                .body(body)
                .send()
                .await
                .context(format!("Failed to upload part {} of {}", part_number, request.key))?;

            let etag = response
                .e_tag()
                .context(format!("No ETag for part {} of {}", part_number, request.key))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
        }

        Ok(parts)
    }
}

/// Read `length` bytes of a file starting at `offset`
async fn part_body(path: &Path, offset: u64, length: u64) -> Result<ByteStream> {
    if length == 0 {
        return Ok(ByteStream::from_static(b""));
    }

    ByteStream::read_from()
        .path(path)
        .offset(offset)
        .length(Length::Exact(length))
        .build()
        .await
        .context(format!("Failed to read {} bytes at offset {} of {:?}", length, offset, path))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .context(format!("Failed to list objects in bucket: {}", bucket))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| RemoteObject {
                    key: key.to_string(),
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        // Check if there are more results
        let next_token = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(ObjectPage { objects, next_token })
    }

    async fn put_object(&self, request: &UploadRequest) -> Result<()> {
        if request.transfer.uses_multipart(request.size) {
            self.put_multipart(request).await
        } else {
            self.put_single(request).await
        }
    }

    fn validate_transfer(&self, transfer: &TransferConfig) -> Result<(), SyncError> {
        transfer.validate_part_size()
    }
}

/// Website URL for a bucket
///
/// Custom endpoints get `<endpoint>/<bucket>`. AWS regions use either the
/// dash or the dot form of the website endpoint.
pub fn website_url(bucket: &str, region: &str, endpoint: Option<&str>) -> String {
    if let Some(endpoint) = endpoint {
        return format!("{}/{}", endpoint.trim_end_matches('/'), bucket);
    }

    if DASH_WEBSITE_REGIONS.contains(&region) {
        format!("http://{}.s3-website-{}.amazonaws.com", bucket, region)
    } else {
        format!("http://{}.s3-website.{}.amazonaws.com", bucket, region)
    }
}
