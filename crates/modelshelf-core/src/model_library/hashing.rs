//! Streaming SHA256 for model files.
//!
//! Digests are upper-case hex, matching the catalog's `SHA256` file hashes.
//! Model files run to several gigabytes, so the file is read in fixed chunks.

use crate::error::{Result, ShelfError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Chunk size for reading files (4MB).
const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Length of the catalog's short "AutoV2" hash.
pub const SHORT_HASH_LEN: usize = 10;

/// Compute the SHA256 of a file as 64 upper-case hex characters.
///
/// # Arguments
///
/// * `path` - Path to the file to hash
pub fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| ShelfError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| ShelfError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode_upper(hasher.finalize()))
}

/// Compute the SHA256 on the blocking thread pool.
pub async fn compute_sha256_async(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || compute_sha256(&path))
        .await
        .map_err(|e| ShelfError::Other(format!("Hash computation task failed: {}", e)))?
}

/// Short hash shown next to a model: the first ten hex characters.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

/// Compare two digests ignoring case.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
