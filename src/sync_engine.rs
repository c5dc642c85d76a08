//! Sync engine
//!
//! Uploads the files under a local directory to a bucket, skipping every file
//! whose fingerprint already matches the remote object's ETag.
//!
//! A run goes through these steps:
//! 1. Resolve the root and validate settings (fatal on failure)
//! 2. Load the complete remote manifest (fatal on failure)
//! 3. Walk the root
//! 4. Fingerprint, compare and maybe upload each file, up to
//!    `max_parallel` files at a time
//!
//! A failure in step 4 only fails that file. Its error is recorded in
//! [`SyncStats::failures`] and the other files continue.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::{SyncOptions, TransferConfig};
use crate::error::SyncError;
use crate::fingerprint::{fingerprint_file, Fingerprint};
use crate::manifest::{load_manifest, Manifest};
use crate::mime::content_type_for;
use crate::store::{ObjectStore, UploadRequest};
use crate::walker::{DirectoryWalker, LocalFile};

/// A file that could not be synced
#[derive(Debug)]
pub struct FileFailure {
    /// Object key, or the local path when the failure happened while walking
    pub key: String,
    pub error: SyncError,
}

/// Sync statistics
#[derive(Debug, Default)]
pub struct SyncStats {
    pub files_scanned: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
    pub multipart_uploads: usize,
    pub bytes_uploaded: u64,
    pub errors: usize,
    pub failures: Vec<FileFailure>,
}

impl SyncStats {
    /// A run with nothing to upload and no failures is a success too.
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Uploaded { bytes, multipart } => {
                self.files_uploaded += 1;
                self.bytes_uploaded += bytes;
                if multipart {
                    self.multipart_uploads += 1;
                }
            }
            FileOutcome::Skipped => self.files_skipped += 1,
            FileOutcome::Failed { key, error } => self.record_failure(key, error),
        }
    }

    fn record_failure(&mut self, key: String, error: SyncError) {
        self.errors += 1;
        self.failures.push(FileFailure { key, error });
    }
}

/// What happened to one file
#[derive(Debug)]
enum FileOutcome {
    Uploaded { bytes: u64, multipart: bool },
    Skipped,
    Failed { key: String, error: SyncError },
}

/// Change-detecting uploader from a local directory to one object store
pub struct SyncEngine<S> {
    store: S,
    transfer: TransferConfig,
    options: SyncOptions,
}

impl<S: ObjectStore> SyncEngine<S> {
    /// Create an engine, rejecting invalid transfer or sync settings and
    /// transfer settings the store cannot upload with
    pub fn new(store: S, transfer: TransferConfig, options: SyncOptions) -> Result<Self, SyncError> {
        transfer.validate()?;
        options.validate()?;
        store.validate_transfer(&transfer)?;

        Ok(Self {
            store,
            transfer,
            options,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transfer(&self) -> &TransferConfig {
        &self.transfer
    }

    /// Sync a local directory into a bucket
    ///
    /// # Arguments
    /// * `root` - Local directory to sync; must exist
    /// * `bucket` - Destination bucket
    ///
    /// # Returns
    /// Sync statistics, including per-file failures. `Err` only for fatal
    /// errors (bad root, incomplete manifest), in which case nothing was uploaded.
    pub async fn sync<P: AsRef<Path>>(&self, root: P, bucket: &str) -> Result<SyncStats, SyncError> {
        let walker = DirectoryWalker::new(root)?;

        info!("Starting sync: {:?} -> s3://{}", walker.root(), bucket);
        info!(
            "Sync options: chunk_size={}, max_parallel={}, force={}, dry_run={}",
            self.transfer.chunk_size, self.options.max_parallel, self.options.force, self.options.dry_run
        );

        let manifest = if self.options.force {
            warn!("Force mode: ignoring remote manifest, every file will be uploaded");
            Manifest::default()
        } else {
            load_manifest(&self.store, bucket).await?
        };

        let mut stats = SyncStats::default();
        let mut files = Vec::new();

        for entry in walker.walk() {
            match entry {
                Ok(file) => files.push(file),
                Err(e) => {
                    error!("Failed to read directory entry: {}", e);
                    let key = match &e {
                        SyncError::Io { path, .. } => path.display().to_string(),
                        other => other.to_string(),
                    };
                    stats.record_failure(key, e);
                }
            }
        }

        stats.files_scanned = files.len();
        info!("Found {} local files to check", files.len());

        let progress = self.progress_bar(files.len());
        let manifest = &manifest;
        let progress_ref = &progress;

        let mut outcomes = stream::iter(files)
            .map(|file| async move {
                let key = file.relative_key.clone();
                let outcome = self.process_file(file, manifest, bucket).await;
                progress_ref.set_message(key);
                progress_ref.inc(1);
                outcome
            })
            .buffer_unordered(self.options.max_parallel);

        while let Some(outcome) = outcomes.next().await {
            stats.record(outcome);
        }

        progress.finish_and_clear();

        info!(
            "Sync completed: uploaded={}, skipped={}, errors={}, bytes={}",
            stats.files_uploaded, stats.files_skipped, stats.errors, stats.bytes_uploaded
        );

        Ok(stats)
    }

    async fn process_file(&self, file: LocalFile, manifest: &Manifest, bucket: &str) -> FileOutcome {
        let key = file.relative_key.clone();

        match self.sync_file(file, manifest, bucket).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!("Failed to sync {}: {}", key, error);
                FileOutcome::Failed { key, error }
            }
        }
    }

    async fn sync_file(
        &self,
        file: LocalFile,
        manifest: &Manifest,
        bucket: &str,
    ) -> Result<FileOutcome, SyncError> {
        let (fingerprint, size) = self.fingerprint(&file).await?;
        let key = file.relative_key;

        if manifest.matches(&key, &fingerprint) {
            debug!("Skipping (unchanged): {} [{}]", key, fingerprint);
            return Ok(FileOutcome::Skipped);
        }

        match manifest.get(&key) {
            Some(remote) => debug!("Changed: {} (local {}, remote {})", key, fingerprint, remote),
            None => debug!("New: {} [{}]", key, fingerprint),
        }

        let multipart = self.transfer.uses_multipart(size);
        let request = UploadRequest {
            bucket: bucket.to_string(),
            key: key.clone(),
            local_path: file.absolute_path,
            content_type: content_type_for(&key).to_string(),
            size,
            transfer: self.transfer,
        };

        if self.options.dry_run {
            info!("[DRY RUN] Would upload: {:?} -> {}", request.local_path, key);
            return Ok(FileOutcome::Uploaded {
                bytes: size,
                multipart,
            });
        }

        self.store
            .put_object(&request)
            .await
            .map_err(|e| SyncError::RemoteUpload {
                key: key.clone(),
                message: format!("{:#}", e),
            })?;

        info!(
            "✓ Uploaded{}: {} ({} bytes, {})",
            if multipart { " (multipart)" } else { "" },
            key,
            size,
            request.content_type
        );

        Ok(FileOutcome::Uploaded {
            bytes: size,
            multipart,
        })
    }

    /// Hash a file on the blocking pool; returns its fingerprint and the
    /// number of bytes hashed
    async fn fingerprint(&self, file: &LocalFile) -> Result<(Fingerprint, u64), SyncError> {
        let path = file.absolute_path.clone();
        let chunk_size = self.transfer.chunk_size;

        let result = tokio::task::spawn_blocking(move || fingerprint_file(&path, chunk_size))
            .await
            .map_err(|e| SyncError::io(&file.absolute_path, io::Error::new(io::ErrorKind::Other, e)))?;

        result.map_err(|e| SyncError::io(&file.absolute_path, e))
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let progress_bar = ProgressBar::new(len as u64);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        progress_bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_bytes;
    use crate::store::mock::MockStore;
    use crate::store::RemoteObject;
    use std::fs;
    use std::sync::atomic::Ordering;

    const CHUNK: u64 = 1024;

    fn options() -> SyncOptions {
        SyncOptions {
            show_progress: false,
            ..SyncOptions::default()
        }
    }

    fn engine(store: MockStore) -> SyncEngine<MockStore> {
        SyncEngine::new(store, TransferConfig::with_chunk_size(CHUNK), options()).unwrap()
    }

    fn remote(key: &str, data: &[u8]) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            etag: format!("\"{}\"", fingerprint_bytes(data, CHUNK).unwrap()),
            size: data.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("img")).unwrap();
        fs::write(dir.path().join("index.html"), vec![b'a'; 500]).unwrap();
        fs::write(dir.path().join("img/logo.png"), vec![b'p'; (CHUNK * 3 + 10) as usize]).unwrap();

        let engine = engine(MockStore::new());
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_scanned, 2);
        assert_eq!(stats.files_uploaded, 2);
        assert_eq!(stats.files_skipped, 0);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.multipart_uploads, 1);
        assert!(stats.is_success());
        assert_eq!(engine.store().uploaded_keys(), vec!["img/logo.png", "index.html"]);

        let index = engine.store().upload_for("index.html").unwrap();
        assert_eq!(index.bucket, "site");
        assert_eq!(index.content_type, "text/html");
        assert!(!index.transfer.uses_multipart(index.size));
        assert_eq!(fingerprint_file(&index.local_path, CHUNK).unwrap().0.parts(), 1);

        let logo = engine.store().upload_for("img/logo.png").unwrap();
        assert_eq!(logo.content_type, "image/png");
        assert!(logo.transfer.uses_multipart(logo.size));
        assert_eq!(logo.transfer.part_count(logo.size), 4);
        assert_eq!(fingerprint_file(&logo.local_path, CHUNK).unwrap().0.parts(), 4);
    }

    #[tokio::test]
    async fn test_skips_matching_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"unchanged content").unwrap();

        let store = MockStore::with_objects(vec![remote("a.txt", b"unchanged content")], 100);
        let engine = engine(store);
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.files_skipped, 1);
        assert!(engine.store().uploaded_keys().is_empty());
        assert!(stats.is_success());
    }

    #[tokio::test]
    async fn test_uploads_changed_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"new content").unwrap();

        let store = MockStore::with_objects(vec![remote("a.txt", b"old content")], 100);
        let engine = engine(store);
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(engine.store().uploaded_keys(), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_new_file_is_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"same").unwrap();
        fs::write(dir.path().join("b.txt"), b"same").unwrap();

        let store = MockStore::with_objects(vec![remote("a.txt", b"same")], 100);
        let engine = engine(store);
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_skipped, 1);
        assert_eq!(engine.store().uploaded_keys(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_zero_byte_file_convention() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.txt"), b"").unwrap();

        // Absent remotely: uploaded.
        let first = engine(MockStore::new());
        let stats = first.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 1);

        // Remote object is also empty: skipped.
        let second = engine(MockStore::with_objects(
            vec![RemoteObject {
                key: "empty.txt".to_string(),
                etag: "\"d41d8cd98f00b204e9800998ecf8427e\"".to_string(),
                size: 0,
            }],
            100,
        ));
        let stats = second.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_upload_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.png"), b"png bytes").unwrap();
        fs::write(dir.path().join("c.html"), b"<html></html>").unwrap();

        let engine = engine(MockStore::new().failing_upload("b.png"));
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(stats.errors, 1);
        assert!(!stats.is_success());
        assert_eq!(engine.store().uploaded_keys(), vec!["c.html"]);
        assert_eq!(stats.failures[0].key, "b.png");
        assert!(matches!(stats.failures[0].error, SyncError::RemoteUpload { .. }));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_before_upload() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let engine = engine(MockStore::new().failing_listing());
        let err = engine.sync(dir.path(), "site").await.unwrap_err();

        assert!(matches!(err, SyncError::RemoteList { .. }));
        assert!(engine.store().uploaded_keys().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_fails_before_listing() {
        let dir = tempfile::tempdir().unwrap();

        let engine = engine(MockStore::new());
        let err = engine.sync(dir.path().join("missing"), "site").await.unwrap_err();

        assert!(matches!(err, SyncError::Configuration(_)));
        assert_eq!(engine.store().list_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let zero_chunk = SyncEngine::new(MockStore::new(), TransferConfig::with_chunk_size(0), options());
        assert!(matches!(zero_chunk, Err(SyncError::Configuration(_))));

        let no_workers = SyncEngine::new(
            MockStore::new(),
            TransferConfig::default(),
            SyncOptions {
                max_parallel: 0,
                ..options()
            },
        );
        assert!(matches!(no_workers, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_force_ignores_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"same").unwrap();

        let store = MockStore::with_objects(vec![remote("a.txt", b"same")], 100);
        let engine = SyncEngine::new(
            store,
            TransferConfig::with_chunk_size(CHUNK),
            SyncOptions {
                force: true,
                ..options()
            },
        )
        .unwrap();
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert_eq!(engine.store().list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let engine = SyncEngine::new(
            MockStore::new(),
            TransferConfig::with_chunk_size(CHUNK),
            SyncOptions {
                dry_run: true,
                ..options()
            },
        )
        .unwrap();
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.files_uploaded, 1);
        assert!(engine.store().uploaded_keys().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_skips_everything_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("index.html"), vec![b'i'; 700]).unwrap();
        fs::write(dir.path().join("css/site.css"), vec![b'c'; (CHUNK * 2) as usize]).unwrap();
        fs::write(dir.path().join("big.bin"), vec![b'b'; (CHUNK * 5 + 1) as usize]).unwrap();

        let first = engine(MockStore::new());
        let stats = first.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 3);

        // The store reports, for each uploaded object, the ETag S3 would compute
        // when the upload is chunked with the same transfer settings.
        let objects: Vec<RemoteObject> = first
            .store()
            .uploads
            .lock()
            .unwrap()
            .iter()
            .map(|req| {
                let data = fs::read(&req.local_path).unwrap();
                remote(&req.key, &data)
            })
            .collect();

        let second = engine(MockStore::with_objects(objects, 2));
        let stats = second.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.files_skipped, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_entry_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.html"), b"<html></html>").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.css"), dir.path().join("broken.css"))
            .unwrap();

        let engine = engine(MockStore::new());
        let stats = engine.sync(dir.path(), "site").await.unwrap();

        assert_eq!(stats.errors, 1);
        assert_eq!(stats.files_uploaded, 1);
        assert!(!stats.is_success());
        assert_eq!(engine.store().uploaded_keys(), vec!["good.html"]);
        assert!(matches!(stats.failures[0].error, SyncError::Io { .. }));
    }

    #[tokio::test]
    async fn test_file_removed_before_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vanished.txt");
        fs::write(&path, b"here for the walk").unwrap();
        let file = LocalFile::new(dir.path(), &path).unwrap();
        fs::remove_file(&path).unwrap();

        let engine = engine(MockStore::new());
        let outcome = engine.process_file(file, &Manifest::default(), "site").await;

        match outcome {
            FileOutcome::Failed { key, error } => {
                assert_eq!(key, "vanished.txt");
                assert!(matches!(error, SyncError::Io { .. }));
            }
            other => panic!("expected a failure, got {:?}", other),
        }
        assert!(engine.store().uploaded_keys().is_empty());
    }

    #[tokio::test]
    async fn test_upload_size_is_bytes_fingerprinted() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'd'; (CHUNK * 2 + 5) as usize];
        fs::write(dir.path().join("data.bin"), &data).unwrap();

        let engine = engine(MockStore::new());
        engine.sync(dir.path(), "site").await.unwrap();

        let upload = engine.store().upload_for("data.bin").unwrap();
        assert_eq!(upload.size, data.len() as u64);
        assert_eq!(upload.transfer.part_count(upload.size), 3);
    }

    #[test]
    fn test_independent_threshold_is_rejected() {
        let transfer = TransferConfig {
            chunk_size: 100,
            multipart_threshold: 1000,
        };
        let result = SyncEngine::new(MockStore::new(), transfer, options());
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_multipart_upload_matches_on_second_run() {
        // 500 bytes in 100 byte chunks: uploaded multipart, so the remote
        // ETag carries the part count the local fingerprint has.
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'm'; 500];
        fs::write(dir.path().join("mid.bin"), &data).unwrap();
        let transfer = TransferConfig::with_chunk_size(100);

        let first = SyncEngine::new(MockStore::new(), transfer, options()).unwrap();
        let stats = first.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.multipart_uploads, 1);

        let etag = format!("\"{}\"", fingerprint_bytes(&data, 100).unwrap());
        assert!(etag.ends_with("-5\""));
        let objects = vec![RemoteObject {
            key: "mid.bin".to_string(),
            etag,
            size: data.len() as u64,
        }];

        let second =
            SyncEngine::new(MockStore::with_objects(objects, 10), transfer, options()).unwrap();
        let stats = second.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 0);
        assert_eq!(stats.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_progress_bar_tracks_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();

        let engine = SyncEngine::new(
            MockStore::new(),
            TransferConfig::with_chunk_size(CHUNK),
            SyncOptions {
                show_progress: true,
                ..options()
            },
        )
        .unwrap();

        let bar = engine.progress_bar(2);
        assert_eq!(bar.length(), Some(2));
        bar.set_message("a.txt");
        assert_eq!(bar.message(), "a.txt");

        let stats = engine.sync(dir.path(), "site").await.unwrap();
        assert_eq!(stats.files_uploaded, 2);
    }

    #[tokio::test]
    async fn test_sequential_and_parallel_agree() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            fs::write(dir.path().join(format!("f{}.txt", i)), format!("file {}", i)).unwrap();
        }
        let existing: Vec<RemoteObject> = (0..6)
            .map(|i| remote(&format!("f{}.txt", i), format!("file {}", i).as_bytes()))
            .collect();

        for max_parallel in [1, 8] {
            let engine = SyncEngine::new(
                MockStore::with_objects(existing.clone(), 4),
                TransferConfig::with_chunk_size(CHUNK),
                SyncOptions {
                    max_parallel,
                    ..options()
                },
            )
            .unwrap();
            let stats = engine.sync(dir.path(), "site").await.unwrap();

            assert_eq!(stats.files_skipped, 6);
            assert_eq!(stats.files_uploaded, 6);
        }
    }
}
