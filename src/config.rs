//! Configuration module for websync
//!
//! This module defines the S3 connection settings, the transfer (chunking)
//! settings shared by the fingerprinter and the uploader, and the sync run
//! options. Everything is passed explicitly into the engine; nothing here is
//! global.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::SyncError;

/// Default chunk size and multipart threshold (8 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part S3 accepts in a multipart upload, the last part excepted
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest part S3 accepts in a multipart upload
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// S3-compatible storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Provider type: "aws", "b2" (Backblaze B2), "r2" (Cloudflare R2), or "generic"
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Region (optional, falls back to the default provider chain, then us-east-1)
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint URL for S3-compatible services
    /// Examples:
    /// - Backblaze B2: "https://s3.us-west-002.backblazeb2.com"
    /// - Cloudflare R2: "https://<account-id>.r2.cloudflarestorage.com"
    /// - MinIO: "http://localhost:9000"
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Force path-style addressing (true for most S3-compatible services)
    #[serde(default)]
    pub force_path_style: Option<bool>,
    /// Static access key ID. When either key is missing the default AWS
    /// credential chain is used instead.
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_provider() -> String {
    "aws".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            region: None,
            endpoint: None,
            force_path_style: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// Chunking settings.
///
/// The same `chunk_size` drives both the local fingerprint and the multipart
/// part size, so that the ETag S3 computes for an uploaded object equals the
/// fingerprint computed locally. `multipart_threshold` must equal
/// `chunk_size`: a file is fingerprinted as one chunk exactly when it is sent
/// with a single PUT. When omitted from YAML it follows `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTransferConfig")]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub multipart_threshold: u64,
}

/// `TransferConfig` as written in YAML
#[derive(Deserialize)]
struct RawTransferConfig {
    #[serde(default = "default_chunk_size")]
    chunk_size: u64,
    #[serde(default)]
    multipart_threshold: Option<u64>,
}

impl From<RawTransferConfig> for TransferConfig {
    fn from(raw: RawTransferConfig) -> Self {
        Self {
            chunk_size: raw.chunk_size,
            multipart_threshold: raw.multipart_threshold.unwrap_or(raw.chunk_size),
        }
    }
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            multipart_threshold: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TransferConfig {
    /// Use `chunk_size` for both the part size and the multipart threshold
    pub fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            multipart_threshold: chunk_size,
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.chunk_size == 0 {
            return Err(SyncError::Configuration(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.multipart_threshold != self.chunk_size {
            return Err(SyncError::Configuration(format!(
                "multipart_threshold ({}) must equal chunk_size ({}), otherwise uploaded ETags never match local fingerprints",
                self.multipart_threshold, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Check that `chunk_size` is a part size S3 accepts in multipart uploads
    pub fn validate_part_size(&self) -> Result<(), SyncError> {
        if self.chunk_size < MIN_PART_SIZE {
            return Err(SyncError::Configuration(format!(
                "chunk_size ({}) is below the minimum multipart part size of {} bytes",
                self.chunk_size, MIN_PART_SIZE
            )));
        }
        if self.chunk_size > MAX_PART_SIZE {
            return Err(SyncError::Configuration(format!(
                "chunk_size ({}) exceeds the maximum multipart part size of {} bytes",
                self.chunk_size, MAX_PART_SIZE
            )));
        }
        Ok(())
    }

    /// Whether a file of `size` bytes is sent as a multipart upload.
    ///
    /// A file of exactly `multipart_threshold` bytes still goes out as a
    /// single PUT.
    pub fn uses_multipart(&self, size: u64) -> bool {
        size > self.multipart_threshold
    }

    /// Number of `chunk_size` chunks a file of `size` bytes is split into
    pub fn part_count(&self, size: u64) -> u64 {
        if self.chunk_size == 0 {
            return 0;
        }
        size.div_ceil(self.chunk_size)
    }
}

/// Options for one sync run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Maximum number of files fingerprinted/uploaded concurrently
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Decide what would be uploaded without uploading anything
    #[serde(default)]
    pub dry_run: bool,
    /// Ignore the remote manifest and re-upload every file
    #[serde(default)]
    pub force: bool,
    /// Draw a progress bar on stderr
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_max_parallel() -> usize {
    4
}

fn default_show_progress() -> bool {
    true
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            dry_run: false,
            force: false,
            show_progress: default_show_progress(),
        }
    }
}

impl SyncOptions {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.max_parallel == 0 {
            return Err(SyncError::Configuration(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub sync: SyncOptions,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string. An empty document yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(content)
            .context("Failed to parse config YAML")?;

        Ok(config)
    }

    /// Check transfer and sync settings before any work begins
    pub fn validate(&self) -> Result<(), SyncError> {
        self.transfer.validate()?;
        self.sync.validate()
    }
}
