//! Remote manifest
//!
//! A [`Manifest`] is a snapshot of `key -> fingerprint` for every object in a
//! bucket. It is built once at the start of a sync run from a complete
//! listing, read concurrently while files are compared, and dropped when the
//! run ends. Nothing is cached between runs.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::fingerprint::Fingerprint;
use crate::store::{ObjectStore, RemoteObject};

/// Immutable snapshot of remote fingerprints for one bucket
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: HashMap<String, Fingerprint>,
}

impl Manifest {
    pub fn from_objects<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = RemoteObject>,
    {
        let entries = objects
            .into_iter()
            .map(|obj| {
                let fingerprint = Fingerprint::from_etag(&obj.etag, obj.size);
                (obj.key, fingerprint)
            })
            .collect();

        Self { entries }
    }

    /// Remote fingerprint for `key`, or `None` when the object does not exist
    pub fn get(&self, key: &str) -> Option<&Fingerprint> {
        self.entries.get(key)
    }

    /// Whether the remote object under `key` has exactly this fingerprint
    pub fn matches(&self, key: &str, fingerprint: &Fingerprint) -> bool {
        self.get(key) == Some(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// List every object in `bucket`, following continuation tokens until the last page.
///
/// An empty bucket yields an empty list. Any failed page fails the whole listing.
pub async fn list_all_objects<S>(store: &S, bucket: &str) -> Result<Vec<RemoteObject>, SyncError>
where
    S: ObjectStore + ?Sized,
{
    let mut all_objects = Vec::new();
    let mut continuation_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = store
            .list_objects(bucket, continuation_token.take())
            .await
            .map_err(|e| SyncError::RemoteList {
                bucket: bucket.to_string(),
                message: format!("{:#}", e),
            })?;

        pages += 1;
        debug!("Listed page {} of s3://{} ({} objects)", pages, bucket, page.objects.len());
        all_objects.extend(page.objects);

        match page.next_token {
            Some(token) => continuation_token = Some(token),
            None => break,
        }
    }

    Ok(all_objects)
}

/// Build the manifest for `bucket`
///
/// # Arguments
/// * `store` - Remote store to list
/// * `bucket` - Bucket name
///
/// # Returns
/// The complete manifest, or `SyncError::RemoteList` if any page failed
pub async fn load_manifest<S>(store: &S, bucket: &str) -> Result<Manifest, SyncError>
where
    S: ObjectStore + ?Sized,
{
    info!("Loading remote manifest for s3://{}", bucket);

    let objects = list_all_objects(store, bucket).await?;
    let manifest = Manifest::from_objects(objects);

    info!("Remote manifest for s3://{} has {} objects", bucket, manifest.len());
    Ok(manifest)
}
