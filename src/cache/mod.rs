//! Cache layers for expensive provider operations.
//!
//! | Cache | Key | Invalidation |
//! |-------|-----|--------------|
//! | [`UploadCache`] | source key | content hash change, or remote handle not active |
//! | [`SearchCache`] | hash(source key, normalized query) | none; bounded FIFO eviction |

mod search;
mod upload;

pub use search::{search_cache_key, SearchCache, DEFAULT_SEARCH_CACHE_SIZE};
pub use upload::{UploadCache, UploadRecord};

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Block size used when streaming files through the hasher.
pub const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// SHA-256 of a file's contents, hex encoded.
///
/// Reads the file in [`HASH_BLOCK_SIZE`] blocks; the whole file is never
/// held in memory.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
