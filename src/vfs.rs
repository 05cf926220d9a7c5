//! Nested virtual filesystem
//!
//! Mounts archives as read-only virtual roots. A regular file inside an
//! already-mounted root is itself a legitimate mount source, so roots
//! compose to arbitrary nesting depth; nested archive bytes are held in
//! memory, never extracted to a temporary filesystem location.
//!
//! Mounts are cached by source identity within one process. The cache is
//! single-threaded by design (`Rc`/`RefCell`); callers needing concurrent
//! resolution must guard the [`Vfs`] with their own lock. Roots have no
//! unmount operation: code loaded through a root may reference it for the
//! process lifetime.

use crate::error::{CapletError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;
use zip::ZipArchive;

/// Byte source an archive can be opened from
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Metadata for one entry visible through a virtual root
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Entry name, forward slashes, no trailing slash
    pub name: String,
    /// Whether the entry is a directory marker
    pub is_directory: bool,
    /// Uncompressed size in bytes (0 for directories)
    pub size: u64,
    /// Modification timestamp, when the container records one
    pub modified: Option<time::OffsetDateTime>,
}

enum RootInner {
    /// Plain filesystem directory exposed as a root
    Directory(PathBuf),
    /// Open archive with its entry table snapshotted in archive order
    Archive {
        archive: RefCell<ZipArchive<Box<dyn ReadSeek>>>,
        entries: Vec<EntryInfo>,
        index: HashMap<String, usize>,
    },
}

/// A mounted, read-only view over an archive's (or directory's) entries
///
/// Valid for the lifetime of the process once mounted; handles are shared
/// via `Rc` and never explicitly closed.
pub struct VirtualRoot {
    key: String,
    inner: RootInner,
}

impl VirtualRoot {
    /// Identity of this root's source (canonical path, or
    /// `parent-key!/entry` for nested mounts)
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether an entry with this exact name exists
    pub fn contains(&self, name: &str) -> bool {
        match &self.inner {
            RootInner::Directory(base) => base.join(name).exists(),
            RootInner::Archive { index, .. } => index.contains_key(name.trim_end_matches('/')),
        }
    }

    /// Read an entry's full content
    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        match &self.inner {
            RootInner::Directory(base) => {
                let path = base.join(name);
                if !path.is_file() {
                    return Err(self.not_found(name));
                }
                Ok(std::fs::read(path)?)
            }
            RootInner::Archive {
                archive,
                entries,
                index,
            } => {
                let position = index
                    .get(name.trim_end_matches('/'))
                    .copied()
                    .ok_or_else(|| self.not_found(name))?;
                if entries[position].is_directory {
                    return Err(self.not_found(name));
                }
                let mut guard = archive.borrow_mut();
                let mut entry = guard.by_index(position)?;
                let mut content = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut content)?;
                Ok(content)
            }
        }
    }

    /// Metadata for one entry
    pub fn entry_info(&self, name: &str) -> Result<EntryInfo> {
        match &self.inner {
            RootInner::Directory(base) => {
                let path = base.join(name);
                let meta = std::fs::metadata(&path).map_err(|_| self.not_found(name))?;
                Ok(EntryInfo {
                    name: name.trim_end_matches('/').to_string(),
                    is_directory: meta.is_dir(),
                    size: if meta.is_dir() { 0 } else { meta.len() },
                    modified: meta.modified().ok().map(time::OffsetDateTime::from),
                })
            }
            RootInner::Archive { entries, index, .. } => index
                .get(name.trim_end_matches('/'))
                .map(|&position| entries[position].clone())
                .ok_or_else(|| self.not_found(name)),
        }
    }

    /// List the direct children of a directory, in archive order
    ///
    /// An empty `directory` lists the root level.
    pub fn list(&self, directory: &str) -> Result<Vec<EntryInfo>> {
        let dir = directory.trim_matches('/');
        match &self.inner {
            RootInner::Directory(base) => {
                let path = if dir.is_empty() {
                    base.clone()
                } else {
                    base.join(dir)
                };
                if !path.is_dir() {
                    return Err(self.not_found(directory));
                }
                let mut children = Vec::new();
                for child in std::fs::read_dir(path)? {
                    let child = child?;
                    let child_name = child.file_name().to_string_lossy().into_owned();
                    let full = if dir.is_empty() {
                        child_name
                    } else {
                        format!("{}/{}", dir, child_name)
                    };
                    children.push(self.entry_info(&full)?);
                }
                // Directory iteration order is platform-dependent
                children.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(children)
            }
            RootInner::Archive { entries, index, .. } => {
                let prefix = if dir.is_empty() {
                    String::new()
                } else {
                    format!("{}/", dir)
                };
                let children: Vec<EntryInfo> = entries
                    .iter()
                    .filter(|e| {
                        e.name.len() > prefix.len()
                            && e.name.starts_with(prefix.as_str())
                            && !e.name[prefix.len()..].contains('/')
                    })
                    .cloned()
                    .collect();
                if children.is_empty() && !dir.is_empty() && !index.contains_key(dir) {
                    return Err(self.not_found(directory));
                }
                Ok(children)
            }
        }
    }

    fn not_found(&self, name: &str) -> CapletError {
        CapletError::NotFound(format!("{}!/{}", self.key, name))
    }

    /// Open an archive from `reader` and snapshot its entry table
    fn open_archive(key: String, reader: Box<dyn ReadSeek>) -> Result<Self> {
        let mut archive = ZipArchive::new(reader).map_err(|e| match e {
            zip::result::ZipError::Io(io) => CapletError::Io(io),
            _ => CapletError::NotAnArchive(key.clone()),
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut index = HashMap::with_capacity(archive.len());
        for position in 0..archive.len() {
            let entry = archive.by_index(position)?;
            let name = entry.name().trim_end_matches('/').to_string();
            index.insert(name.clone(), position);
            entries.push(EntryInfo {
                name,
                is_directory: entry.is_dir(),
                size: entry.size(),
                modified: entry
                    .last_modified()
                    .and_then(|dt| time::OffsetDateTime::try_from(dt).ok()),
            });
        }

        Ok(Self {
            key,
            inner: RootInner::Archive {
                archive: RefCell::new(archive),
                entries,
                index,
            },
        })
    }
}

/// Mount cache composing virtual roots to arbitrary nesting depth
pub struct Vfs {
    mounts: RefCell<HashMap<String, Rc<VirtualRoot>>>,
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            mounts: RefCell::new(HashMap::new()),
        }
    }

    /// Mount a plain filesystem path: a directory becomes a directory root,
    /// a regular file is opened read-only as an archive root
    pub fn mount_path<P: AsRef<Path>>(&self, path: P) -> Result<Rc<VirtualRoot>> {
        let canonical = std::fs::canonicalize(path.as_ref())?;
        let key = canonical.to_string_lossy().into_owned();
        if let Some(root) = self.mounts.borrow().get(&key) {
            return Ok(root.clone());
        }

        let root = if canonical.is_dir() {
            VirtualRoot {
                key: key.clone(),
                inner: RootInner::Directory(canonical),
            }
        } else {
            let file = File::open(&canonical)?;
            VirtualRoot::open_archive(key.clone(), Box::new(file))?
        };

        debug!(key = %key, "mounted root");
        let root = Rc::new(root);
        self.mounts.borrow_mut().insert(key, root.clone());
        Ok(root)
    }

    /// Mount a regular file inside an already-mounted root as a new root
    /// nested one level deeper
    pub fn mount_nested(&self, parent: &Rc<VirtualRoot>, entry_name: &str) -> Result<Rc<VirtualRoot>> {
        let key = format!("{}!/{}", parent.key(), entry_name);
        if let Some(root) = self.mounts.borrow().get(&key) {
            return Ok(root.clone());
        }

        let content = parent.read(entry_name)?;
        let root = VirtualRoot::open_archive(key.clone(), Box::new(Cursor::new(content)))?;

        debug!(key = %key, "mounted nested root");
        let root = Rc::new(root);
        self.mounts.borrow_mut().insert(key, root.clone());
        Ok(root)
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}
