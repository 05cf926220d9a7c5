//! Launch sequencer
//!
//! Drives a launch from start to finish: locate the running archive, mount
//! the dependency roots found under the reserved path, resolve the entry
//! unit, invoke the entry operation. The sequence is linear; no state is
//! re-entered and a failure at any step terminates the launch with its
//! cause.

use crate::archive::is_nested_archive_name;
use crate::error::{CapletError, Result};
use crate::loader::{CodeLoader, OperationRegistry};
use crate::manifest::{ManifestIndex, LIBRARIES_DIR, MANIFEST_PATH};
use crate::vfs::{Vfs, VirtualRoot};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// Entry operation invoked by [`Launcher::launch`]
pub const DEFAULT_ENTRY_OPERATION: &str = "main";

/// Resolve `unit_name`'s `operation_name` against `roots` (first root
/// containing the unit wins) and invoke it with `args`
pub fn load_and_run(
    roots: Vec<Rc<VirtualRoot>>,
    registry: &OperationRegistry,
    unit_name: &str,
    operation_name: &str,
    args: &[String],
) -> Result<()> {
    CodeLoader::new(roots).invoke(registry, unit_name, operation_name, args)
}

/// Bootstrap for a built archive: self-location, root discovery, launch
pub struct Launcher {
    vfs: Vfs,
    manifest: ManifestIndex,
    loader: CodeLoader,
}

impl Launcher {
    /// Locate the archive this process is running from and open it
    ///
    /// Fails with `SelfLocation` when the running image cannot be
    /// determined or is not a readable archive container.
    pub fn from_current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| CapletError::SelfLocation(e.to_string()))?;
        debug!(image = %exe.display(), "located running image");
        Self::open(&exe).map_err(|e| match e {
            CapletError::NotAnArchive(detail) | CapletError::SelfLocation(detail) => {
                CapletError::SelfLocation(detail)
            }
            CapletError::Io(io) => CapletError::SelfLocation(io.to_string()),
            other => other,
        })
    }

    /// Open a built archive, read its manifest, and mount every dependency
    /// archive found under the reserved path, in archive order
    pub fn open<P: AsRef<Path>>(archive: P) -> Result<Self> {
        let vfs = Vfs::new();
        let archive_root = vfs.mount_path(archive.as_ref())?;

        let manifest_bytes = archive_root
            .read(MANIFEST_PATH)
            .map_err(|_| CapletError::ManifestNotFound)?;
        let manifest = ManifestIndex::from_json(&manifest_bytes)?;

        let mut roots = Vec::new();
        for entry in archive_root.list(LIBRARIES_DIR)? {
            if entry.is_directory || !is_nested_archive_name(&entry.name) {
                continue;
            }
            let root = vfs.mount_nested(&archive_root, &entry.name)?;
            roots.push(root);
        }
        debug!(roots = roots.len(), "dependency roots mounted");

        let loader =
            CodeLoader::new(roots).with_required_module(manifest.entry_module.clone());
        Ok(Self {
            vfs,
            manifest,
            loader,
        })
    }

    /// The manifest index read from the archive
    pub fn manifest(&self) -> &ManifestIndex {
        &self.manifest
    }

    /// The mounted dependency roots, in resolution order
    pub fn roots(&self) -> &[Rc<VirtualRoot>] {
        self.loader.roots()
    }

    /// The mount cache backing this launch
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// The code loader over the dependency roots
    pub fn loader(&self) -> &CodeLoader {
        &self.loader
    }

    /// Invoke the manifest's entry unit's `main` operation with `args`
    pub fn launch(&self, registry: &OperationRegistry, args: &[String]) -> Result<()> {
        let unit = self
            .manifest
            .entry_unit
            .as_deref()
            .ok_or(CapletError::MissingEntryUnit)?;
        info!(unit, operation = DEFAULT_ENTRY_OPERATION, "invoking entry operation");
        self.loader
            .invoke(registry, unit, DEFAULT_ENTRY_OPERATION, args)
    }
}
