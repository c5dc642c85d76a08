//! Object store trait
//!
//! `ObjectStore` is the minimum the sync engine needs from a remote store:
//! a paginated listing and an overwriting upload. [`S3Store`](crate::S3Store)
//! implements it on top of `aws-sdk-s3`; tests use an in-memory mock.

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::TransferConfig;
use crate::error::SyncError;

/// One object returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    /// ETag as reported by the store, quotes included
    pub etag: String,
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Everything needed to upload one local file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub local_path: PathBuf,
    pub content_type: String,
    /// Number of bytes fingerprinted; exactly this many are uploaded
    pub size: u64,
    pub transfer: TransferConfig,
}

/// Remote object store used by a sync run
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of the bucket listing
    async fn list_objects(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage>;

    /// Upload a local file, overwriting any existing object under the same key
    async fn put_object(&self, request: &UploadRequest) -> Result<()>;

    /// Reject transfer settings this store cannot upload with
    fn validate_transfer(&self, _transfer: &TransferConfig) -> Result<(), SyncError> {
        Ok(())
    }
}
