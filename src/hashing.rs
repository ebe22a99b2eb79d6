//! Content hashing for deduplication and change detection.
//!
//! Digests are lowercase hex SHA-256, independent of file name or declared type, and stable
//! across processes and platforms.

use std::io::Read;

use sha2::{Digest, Sha256};

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Compute the content hash of an in-memory buffer.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Compute the content hash of any readable source.
pub fn content_hash_reader<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
