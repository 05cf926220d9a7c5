//! Digest and streaming utilities
//!
//! Buffered copy, running CRC32, and SHA-256 digest computation over byte
//! streams. Every function consumes its source exactly once and propagates
//! the first I/O error without retrying.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Buffer size for all streaming operations (64 KiB)
pub const BUFFER_SIZE: usize = 0x10000;

/// Copy all remaining bytes from `reader` to `writer`.
///
/// Returns the number of bytes transferred. On success the source is fully
/// drained; neither stream is left partially consumed.
pub fn copy<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> Result<u64> {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    Ok(total)
}

/// Compute the SHA-256 digest of everything remaining in `reader`.
pub fn sha256_digest<R: Read>(reader: &mut R) -> Result<[u8; 32]> {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut hasher = Sha256::new();
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().into())
}

/// Consume `reader` fully, returning its byte count and CRC32.
///
/// Used to pre-compute the fields a STORE entry must declare up front.
pub fn size_and_crc32<R: Read>(reader: &mut R) -> Result<(u64, u32)> {
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut hasher = crc32fast::Hasher::new();
    let mut size = 0u64;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((size, hasher.finalize()))
}
