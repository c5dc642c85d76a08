//! Content fingerprints compatible with S3 ETags
//!
//! S3 identifies object content with an ETag. For an object uploaded with a
//! single PUT it is the hex MD5 of the body. For a multipart upload it is the
//! hex MD5 of the concatenated binary MD5s of every part, followed by `-` and
//! the number of parts. Reproducing that scheme locally lets a sync decide
//! whether a file changed without downloading anything.

use md5::{Digest, Md5};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Fingerprint of a local file or a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Zero-byte content. Produces no chunks, so it carries no digest.
    Empty,
    /// Hex MD5 of content that fits in one chunk
    Single(String),
    /// Hex MD5 of the concatenated chunk digests, plus the chunk count
    Multipart { digest: String, parts: usize },
}

impl Fingerprint {
    /// Normalize an ETag reported by the store.
    ///
    /// Surrounding quotes are stripped and hex is lowercased. Objects of size
    /// zero always map to [`Fingerprint::Empty`], whatever their ETag, so an
    /// empty local file matches an empty remote object.
    pub fn from_etag(etag: &str, size: u64) -> Self {
        if size == 0 {
            return Fingerprint::Empty;
        }

        let etag = etag.trim().trim_matches('"').to_ascii_lowercase();

        if let Some((digest, parts)) = etag.split_once('-') {
            if let Ok(parts) = parts.parse::<usize>() {
                return Fingerprint::Multipart {
                    digest: digest.to_string(),
                    parts,
                };
            }
        }

        Fingerprint::Single(etag)
    }

    /// Number of chunks the content was split into
    pub fn parts(&self) -> usize {
        match self {
            Fingerprint::Empty => 0,
            Fingerprint::Single(_) => 1,
            Fingerprint::Multipart { parts, .. } => *parts,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, Fingerprint::Multipart { .. })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Empty => write!(f, "<empty>"),
            Fingerprint::Single(digest) => write!(f, "{}", digest),
            Fingerprint::Multipart { digest, parts } => write!(f, "{}-{}", digest, parts),
        }
    }
}

/// Fingerprint a file on disk
///
/// # Arguments
/// * `path` - File to read
/// * `chunk_size` - Chunk size in bytes, the same one used as multipart part size
///
/// # Returns
/// The fingerprint and the number of bytes hashed, or the I/O error that
/// stopped the read. The byte count is the size of the content the
/// fingerprint describes, which may differ from a later `metadata()` call if
/// the file is being written to.
pub fn fingerprint_file<P: AsRef<Path>>(path: P, chunk_size: u64) -> io::Result<(Fingerprint, u64)> {
    let file = File::open(path.as_ref())?;
    fingerprint_reader(BufReader::new(file), chunk_size)
}

/// Fingerprint an in-memory byte slice
pub fn fingerprint_bytes(data: &[u8], chunk_size: u64) -> io::Result<Fingerprint> {
    fingerprint_reader(data, chunk_size).map(|(fingerprint, _)| fingerprint)
}

/// Fingerprint everything `reader` yields, in chunks of exactly `chunk_size` bytes.
/// Returns the fingerprint and the total number of bytes read.
pub fn fingerprint_reader<R: Read>(mut reader: R, chunk_size: u64) -> io::Result<(Fingerprint, u64)> {
    if chunk_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "chunk size must be greater than 0",
        ));
    }

    let mut digests = Vec::new();
    let mut total = 0u64;

    loop {
        let mut hasher = Md5::new();
        let read = io::copy(&mut (&mut reader).take(chunk_size), &mut hasher)?;
        if read == 0 {
            break;
        }
        total += read;
        digests.push(hasher.finalize());
        if read < chunk_size {
            break;
        }
    }

    Ok((combine(&digests), total))
}

/// Fold ordered chunk digests into a fingerprint. Order matters: it decides
/// where each digest lands in the concatenation.
fn combine(digests: &[md5::digest::Output<Md5>]) -> Fingerprint {
    match digests {
        [] => Fingerprint::Empty,
        [only] => Fingerprint::Single(format!("{:x}", only)),
        _ => {
            let outer = digests
                .iter()
                .fold(Md5::new(), |mut hasher, digest| {
                    hasher.update(digest);
                    hasher
                })
                .finalize();

            Fingerprint::Multipart {
                digest: format!("{:x}", outer),
                parts: digests.len(),
            }
        }
    }
}
