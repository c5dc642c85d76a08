//! Websync
//!
//! Deploy static websites to S3: set up a website bucket and sync a local
//! directory into it, uploading only what changed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use websync::{Config, S3Store, SyncEngine};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "websync")]
#[command(about = "Deploy websites to S3", long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Region override
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Custom S3-compatible endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all buckets
    ListBuckets,

    /// List all objects in a bucket
    ListBucketObjects {
        bucket: String,
    },

    /// Create a bucket and configure it for static website hosting
    SetupBucket {
        bucket: String,
    },

    /// Sync the contents of a local directory to a bucket
    Sync {
        /// Local directory to upload
        path: PathBuf,

        /// Destination bucket
        bucket: String,

        /// Chunk size and multipart threshold in bytes
        #[arg(long, value_name = "BYTES")]
        chunk_size: Option<u64>,

        /// Maximum number of files processed concurrently
        #[arg(long, value_name = "N")]
        max_parallel: Option<usize>,

        /// Show what would be uploaded without uploading
        #[arg(long)]
        dry_run: bool,

        /// Ignore remote state and upload every file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG replaces the default filter entirely
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path).context("Failed to load configuration")?
        }
        None => Config::default(),
    };

    if args.region.is_some() {
        config.s3.region = args.region.clone();
    }
    if args.endpoint.is_some() {
        config.s3.endpoint = args.endpoint.clone();
    }

    match args.command {
        Command::ListBuckets => {
            let store = S3Store::new(config.s3).await?;
            for bucket in store.list_buckets().await? {
                println!("{}", bucket);
            }
        }
        Command::ListBucketObjects { bucket } => {
            let store = S3Store::new(config.s3).await?;
            for object in store.list_bucket_objects(&bucket).await? {
                println!("{}\t{}\t{}", object.key, object.size, object.etag);
            }
        }
        Command::SetupBucket { bucket } => {
            let store = S3Store::new(config.s3).await?;
            store.setup_bucket(&bucket).await?;
            println!("{}", store.website_url(&bucket));
        }
        Command::Sync {
            path,
            bucket,
            chunk_size,
            max_parallel,
            dry_run,
            force,
        } => {
            if let Some(chunk_size) = chunk_size {
                config.transfer.chunk_size = chunk_size;
                config.transfer.multipart_threshold = chunk_size;
            }
            if let Some(max_parallel) = max_parallel {
                config.sync.max_parallel = max_parallel;
            }
            config.sync.dry_run |= dry_run;
            config.sync.force |= force;
            config.validate()?;

            let store = S3Store::new(config.s3).await?;
            let website = store.website_url(&bucket);
            let engine = SyncEngine::new(store, config.transfer, config.sync)?;

            let stats = engine.sync(&path, &bucket).await?;

            println!("\nSync Statistics:");
            println!("  Files scanned: {}", stats.files_scanned);
            println!("  Files uploaded: {}", stats.files_uploaded);
            println!("  Files skipped: {}", stats.files_skipped);
            println!("  Multipart uploads: {}", stats.multipart_uploads);
            println!("  Bytes uploaded: {} KB", stats.bytes_uploaded / 1024);
            println!("  Errors: {}", stats.errors);

            for failure in &stats.failures {
                error!("{}: {}", failure.key, failure.error);
            }

            if !stats.is_success() {
                bail!("{} file(s) failed to sync", stats.errors);
            }

            println!("\n{}", website);
        }
    }

    Ok(())
}
