//! Manifest index for caplet archives
//!
//! The manifest is the archive's first content entry. It carries the two
//! attributes the launch sequencer consumes (`entry_unit` and the optional
//! `entry_module`) plus a base64 SHA-256 digest for every entry stored under
//! the reserved dependency path, so embedded dependencies can be verified
//! without unpacking them.
//!
//! # Archive layout
//!
//! ```text
//! app.arc
//! ├── META/                   (reserved metadata directory)
//! │   └── manifest.json       (this index; always the first content entry)
//! ├── LIB/                    (reserved dependency path)
//! │   ├── app.arc             (nested archive, stored verbatim)
//! │   └── dep1.arc
//! └── ...
//! ```

use crate::error::{CapletError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved top-level directory holding embedded dependency archives
pub const LIBRARIES_DIR: &str = "LIB";

/// Reserved top-level directory holding archive metadata
pub const METADATA_DIR: &str = "META";

/// Archive entry name of the serialized manifest index
pub const MANIFEST_PATH: &str = "META/manifest.json";

/// Manifest format version written by this crate
pub const MANIFEST_VERSION: &str = "1.0";

/// Per-entry attributes recorded in the manifest index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryAttributes {
    /// Base64-encoded SHA-256 digest of the entry's content
    pub sha256: String,
}

/// The archive's leading index
///
/// Built incrementally while the builder streams entries, then serialized
/// as the first content entry of the final archive. Entry names map to
/// attributes; a `BTreeMap` keeps serialization deterministic so identical
/// inputs produce byte-identical archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndex {
    /// Manifest format version
    pub version: String,

    /// Fully-qualified name of the code unit to launch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_unit: Option<String>,

    /// Optional module grouping the entry unit must resolve within
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_module: Option<String>,

    /// Attributes keyed by entry name, for entries under the dependency path
    #[serde(default)]
    pub entries: BTreeMap<String, EntryAttributes>,
}

impl ManifestIndex {
    /// Create an empty manifest index
    pub fn new(entry_unit: Option<String>, entry_module: Option<String>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            entry_unit,
            entry_module,
            entries: BTreeMap::new(),
        }
    }

    /// Record the integrity digest for an entry under the dependency path
    pub fn record_digest(&mut self, entry_name: &str, digest: &[u8; 32]) {
        self.entries.insert(
            entry_name.to_string(),
            EntryAttributes {
                sha256: BASE64.encode(digest),
            },
        );
    }

    /// Look up the recorded base64 digest for an entry name
    pub fn digest_of(&self, entry_name: &str) -> Option<&str> {
        self.entries.get(entry_name).map(|attr| attr.sha256.as_str())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(CapletError::from)
    }

    /// Parse from JSON
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(CapletError::from)
    }
}

/// True if `entry_name` lies under the reserved dependency path
pub fn is_library_entry(entry_name: &str) -> bool {
    entry_name
        .strip_prefix(LIBRARIES_DIR)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty())
}

/// True if `entry_name` collides with the reserved metadata directory
pub fn collides_with_metadata(entry_name: &str) -> bool {
    let trimmed = entry_name.trim_end_matches('/');
    trimmed == METADATA_DIR || trimmed.starts_with(&format!("{}/", METADATA_DIR))
}
