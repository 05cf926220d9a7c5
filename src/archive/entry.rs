//! Archive entry model
//!
//! In-memory representation of one archive record and the policy that
//! derives it from a source file: compression-method selection (never
//! recompress a pre-compressed container), STORE pre-pass for size/CRC,
//! and the deterministic-timestamp rule.

use crate::error::Result;
use crate::manifest::is_library_entry;
use crate::stream;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::DateTime;

/// Extensions that denote a nested archive, mountable as a virtual root
const NESTED_ARCHIVE_EXTENSIONS: &[&str] = &["arc", "zip", "jar"];

/// Extensions of pre-compressed containers that must never be deflated again
const PRECOMPRESSED_EXTENSIONS: &[&str] = &[
    "arc", "zip", "jar", "gz", "tgz", "xz", "zst", "bz2",
];

/// Compression method for one archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    /// Stored verbatim; size and CRC must be known before writing
    Store,
    /// Deflate-compressed; the container writer computes size and CRC
    Deflate,
}

impl EntryMethod {
    /// The zip-crate method this maps onto
    pub fn to_zip(self) -> zip::CompressionMethod {
        match self {
            EntryMethod::Store => zip::CompressionMethod::Stored,
            EntryMethod::Deflate => zip::CompressionMethod::Deflated,
        }
    }
}

/// Descriptor for one archive record, immutable once the entry is written
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    /// Entry name inside the archive (forward slashes, no leading slash)
    pub name: String,

    /// Timestamp stamped on the entry
    pub timestamp: DateTime,

    /// Chosen compression method
    pub method: EntryMethod,

    /// Uncompressed size; 0 for directories, pre-computed for STORE files
    pub size: u64,

    /// Compressed size; equals `size` for STORE entries. For DEFLATE
    /// entries the container writer determines it while compressing.
    pub compressed_size: u64,

    /// CRC32 of the content; pre-computed for STORE files, 0 until the
    /// container writer fills it for DEFLATE entries
    pub crc32: u32,

    /// Whether this record is a directory marker
    pub is_directory: bool,
}

impl EntryDescriptor {
    /// Descriptor for a directory marker: always STORE, size 0
    pub fn for_directory(name: &str, timestamp: DateTime) -> Self {
        Self {
            name: name.trim_end_matches('/').to_string(),
            timestamp,
            method: EntryMethod::Store,
            size: 0,
            compressed_size: 0,
            crc32: 0,
            is_directory: true,
        }
    }

    /// Descriptor for a regular file at `source`, to be written as `name`.
    ///
    /// Pre-compressed containers and everything under the reserved
    /// dependency path are stored verbatim, which requires a full streaming
    /// pass to learn their size and CRC before the entry can be written.
    /// Everything else deflates and needs no pre-pass.
    pub fn for_file(source: &Path, name: &str, timestamp: DateTime) -> Result<Self> {
        if is_precompressed_name(name) || is_library_entry(name) {
            let mut reader = BufReader::new(File::open(source)?);
            let (size, crc32) = stream::size_and_crc32(&mut reader)?;
            Ok(Self {
                name: name.to_string(),
                timestamp,
                method: EntryMethod::Store,
                size,
                compressed_size: size,
                crc32,
                is_directory: false,
            })
        } else {
            let size = std::fs::metadata(source)?.len();
            Ok(Self {
                name: name.to_string(),
                timestamp,
                method: EntryMethod::Deflate,
                size,
                compressed_size: 0,
                crc32: 0,
                is_directory: false,
            })
        }
    }
}

/// The fixed timestamp stamped on every entry when timestamps are not
/// preserved, so archives built from identical inputs are byte-identical
/// regardless of filesystem state. 1980-02-01 sits safely past the DOS
/// epoch in every timezone.
pub fn default_entry_timestamp() -> DateTime {
    DateTime::from_date_and_time(1980, 2, 1, 0, 0, 0).unwrap_or_default()
}

/// Timestamp for an entry sourced from `source` under the given policy
pub fn entry_timestamp(preserve_timestamps: bool, source: &Path) -> DateTime {
    if !preserve_timestamps {
        return default_entry_timestamp();
    }
    std::fs::metadata(source)
        .and_then(|meta| meta.modified())
        .ok()
        .map(time::OffsetDateTime::from)
        .and_then(|odt| DateTime::try_from(odt).ok())
        .unwrap_or_else(default_entry_timestamp)
}

fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True if `name` denotes a nested archive eligible for mounting
pub fn is_nested_archive_name(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| NESTED_ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

/// True if `name` denotes a pre-compressed container that must be stored
pub fn is_precompressed_name(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()))
}
