//! Websync Library
//!
//! Deploys a local directory to an S3 bucket and keeps it in sync by
//! uploading only files whose content changed. Change detection compares a
//! locally computed, ETag-compatible MD5 fingerprint with the ETags of a
//! freshly listed remote manifest.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod mime;
pub mod s3_store;
pub mod store;
pub mod sync_engine;
pub mod walker;

// Re-export commonly used types
pub use config::{Config, S3Config, SyncOptions, TransferConfig};
pub use error::SyncError;
pub use fingerprint::{fingerprint_bytes, fingerprint_file, Fingerprint};
pub use manifest::{load_manifest, Manifest};
pub use mime::content_type_for;
pub use s3_store::{S3Provider, S3Store};
pub use store::{ObjectPage, ObjectStore, RemoteObject, UploadRequest};
pub use sync_engine::{FileFailure, SyncEngine, SyncStats};
pub use walker::{DirectoryWalker, LocalFile};
