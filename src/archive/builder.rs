//! Two-pass archive builder
//!
//! The manifest index must be the archive's first content entry, but its
//! content (per-entry integrity digests) is only known after visiting every
//! entry. All entries are therefore staged into a scratch archive while the
//! index is accumulated, then the final archive is written index-first and
//! the staged entries are re-emitted behind it with their real compression
//! methods.

use crate::archive::entry::{
    default_entry_timestamp, entry_timestamp, EntryDescriptor, EntryMethod,
};
use crate::error::{CapletError, Result};
use crate::manifest::{
    collides_with_metadata, is_library_entry, ManifestIndex, LIBRARIES_DIR, MANIFEST_PATH,
    METADATA_DIR,
};
use crate::stream;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{DateTime, ZipArchive, ZipWriter};

/// One entry the builder must realize
#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Source path on the plain filesystem
    pub source: PathBuf,
    /// Entry name inside the archive
    pub entry_name: String,
    /// Whether this entry is a directory marker
    pub is_directory: bool,
}

impl PlanEntry {
    /// Plan a regular file
    pub fn file<P: AsRef<Path>, S: Into<String>>(source: P, entry_name: S) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            entry_name: entry_name.into(),
            is_directory: false,
        }
    }

    /// Plan an explicit directory marker
    pub fn directory<P: AsRef<Path>, S: Into<String>>(source: P, entry_name: S) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            entry_name: entry_name.into(),
            is_directory: true,
        }
    }
}

/// Ordered list of entries to realize, owned by the caller
#[derive(Debug, Clone, Default)]
pub struct ArchivePlan {
    pub entries: Vec<PlanEntry>,
}

impl ArchivePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a regular file to the plan
    pub fn add_file<P: AsRef<Path>, S: Into<String>>(&mut self, source: P, entry_name: S) {
        self.entries.push(PlanEntry::file(source, entry_name));
    }

    /// Append a directory marker to the plan
    pub fn add_directory<P: AsRef<Path>, S: Into<String>>(&mut self, source: P, entry_name: S) {
        self.entries.push(PlanEntry::directory(source, entry_name));
    }

    /// Append a dependency archive under the reserved dependency path
    pub fn add_library<P: AsRef<Path>>(&mut self, source: P) -> Result<()> {
        let file_name = source
            .as_ref()
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                CapletError::Build(format!(
                    "library source has no usable file name: {}",
                    source.as_ref().display()
                ))
            })?
            .to_string();
        self.add_file(source, format!("{}/{}", LIBRARIES_DIR, file_name));
        Ok(())
    }
}

/// Builds one self-contained archive from an [`ArchivePlan`]
///
/// # Example
///
/// ```no_run
/// use caplet_rs::{ArchiveBuilder, ArchivePlan};
///
/// let mut plan = ArchivePlan::new();
/// plan.add_library("target/dep1.arc")?;
/// ArchiveBuilder::new("app.arc")
///     .entry_unit("main.Program")
///     .build(&plan)?;
/// # Ok::<(), caplet_rs::error::CapletError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    destination: PathBuf,
    preserve_timestamps: bool,
    entry_unit: Option<String>,
    entry_module: Option<String>,
    launcher_stub: Option<PathBuf>,
}

impl ArchiveBuilder {
    /// Create a builder targeting `destination`
    pub fn new<P: AsRef<Path>>(destination: P) -> Self {
        Self {
            destination: destination.as_ref().to_path_buf(),
            preserve_timestamps: false,
            entry_unit: None,
            entry_module: None,
            launcher_stub: None,
        }
    }

    /// Preserve source modification times instead of the fixed timestamp
    pub fn preserve_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    /// Name of the code unit the launch sequencer will run
    pub fn entry_unit<S: Into<String>>(mut self, unit: S) -> Self {
        self.entry_unit = Some(unit.into());
        self
    }

    /// Optional module grouping the entry unit must resolve within
    pub fn entry_module<S: Into<String>>(mut self, module: S) -> Self {
        self.entry_module = Some(module.into());
        self
    }

    /// Prepend a native launcher executable to the archive and mark the
    /// output executable, making it runnable as a single file
    pub fn launcher_stub<P: AsRef<Path>>(mut self, stub: P) -> Self {
        self.launcher_stub = Some(stub.as_ref().to_path_buf());
        self
    }

    /// Produce exactly one archive at the destination, or fail leaving the
    /// destination absent or from a previous successful build
    pub fn build(&self, plan: &ArchivePlan) -> Result<()> {
        let plan = self.validate(plan)?;

        // Pass 1: stage everything into a scratch archive while the
        // manifest index accumulates. The TempDir guard removes the scratch
        // file on every exit path.
        let scratch_dir = tempfile::tempdir()?;
        let scratch_path = scratch_dir.path().join("staging.zip");
        let (manifest, staged) = self.stage(&plan, &scratch_path)?;

        // Pass 2: manifest first, then the staged entries with their real
        // compression methods, into a temp file renamed over the
        // destination only once fully written.
        let parent = match self.destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut output = tempfile::NamedTempFile::new_in(parent)?;
        self.emit(&scratch_path, &manifest, &staged, output.as_file_mut())?;
        output
            .persist(&self.destination)
            .map_err(|e| CapletError::Io(e.error))?;

        #[cfg(unix)]
        if self.launcher_stub.is_some() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.destination, std::fs::Permissions::from_mode(0o755))?;
        }

        info!(
            destination = %self.destination.display(),
            entries = staged.len(),
            "archive built"
        );
        Ok(())
    }

    /// Reject policy violations before any byte is written
    fn validate(&self, plan: &ArchivePlan) -> Result<Vec<PlanEntry>> {
        let mut normalized = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            let name = normalize_entry_name(&entry.entry_name)?;
            if collides_with_metadata(&name) {
                return Err(CapletError::ReservedNameCollision(name));
            }
            normalized.push(PlanEntry {
                source: entry.source.clone(),
                entry_name: name,
                is_directory: entry.is_directory,
            });
        }
        Ok(normalized)
    }

    /// Pass 1: write every plan entry to the scratch archive (STORE only),
    /// synthesizing parent directories and recording descriptors and
    /// dependency digests along the way
    fn stage(
        &self,
        plan: &[PlanEntry],
        scratch_path: &Path,
    ) -> Result<(ManifestIndex, Vec<EntryDescriptor>)> {
        let mut manifest = ManifestIndex::new(self.entry_unit.clone(), self.entry_module.clone());
        let mut staged: Vec<EntryDescriptor> = Vec::new();
        let mut seen_dirs: HashSet<String> = HashSet::new();

        let mut writer = ZipWriter::new(BufWriter::new(File::create(scratch_path)?));
        let store = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        // The reserved dependency path is always present, even for an
        // empty plan.
        let lib_marker = EntryDescriptor::for_directory(LIBRARIES_DIR, self.marker_timestamp());
        writer.add_directory(&lib_marker.name, store)?;
        seen_dirs.insert(lib_marker.name.clone());
        staged.push(lib_marker);

        for entry in plan {
            self.stage_parents(&entry.entry_name, &mut seen_dirs, &mut staged, &mut writer)?;

            if entry.is_directory {
                if seen_dirs.insert(entry.entry_name.clone()) {
                    let desc = EntryDescriptor::for_directory(
                        &entry.entry_name,
                        entry_timestamp(self.preserve_timestamps, &entry.source),
                    );
                    writer.add_directory(&desc.name, store)?;
                    staged.push(desc);
                }
                continue;
            }

            let timestamp = entry_timestamp(self.preserve_timestamps, &entry.source);
            let desc = EntryDescriptor::for_file(&entry.source, &entry.entry_name, timestamp)?;

            if is_library_entry(&desc.name) {
                let mut reader = BufReader::new(File::open(&entry.source)?);
                let digest = stream::sha256_digest(&mut reader)?;
                manifest.record_digest(&desc.name, &digest);
                debug!(entry = %desc.name, sha256 = %hex::encode(digest), "dependency digest");
            }

            writer.start_file(desc.name.as_str(), store)?;
            let mut reader = BufReader::new(File::open(&entry.source)?);
            stream::copy(&mut reader, &mut writer)?;
            staged.push(desc);
        }

        writer.finish()?.flush()?;
        Ok((manifest, staged))
    }

    /// Emit missing parent directory markers for `entry_name`
    fn stage_parents<W: Write + std::io::Seek>(
        &self,
        entry_name: &str,
        seen_dirs: &mut HashSet<String>,
        staged: &mut Vec<EntryDescriptor>,
        writer: &mut ZipWriter<W>,
    ) -> Result<()> {
        let store = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let parts: Vec<&str> = entry_name.split('/').collect();
        let mut prefix = String::new();
        for part in &parts[..parts.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if seen_dirs.insert(prefix.clone()) {
                let desc = EntryDescriptor::for_directory(&prefix, self.marker_timestamp());
                writer.add_directory(&desc.name, store)?;
                staged.push(desc);
            }
        }
        Ok(())
    }

    /// Pass 2: stub preamble, metadata marker, manifest, then every staged
    /// entry with its recorded name, timestamp, and method
    fn emit(
        &self,
        scratch_path: &Path,
        manifest: &ManifestIndex,
        staged: &[EntryDescriptor],
        output: &mut File,
    ) -> Result<()> {
        if let Some(stub) = &self.launcher_stub {
            let mut reader = BufReader::new(File::open(stub)?);
            let digest = stream::sha256_digest(&mut reader)?;
            let mut reader = BufReader::new(File::open(stub)?);
            let bytes = stream::copy(&mut reader, output)?;
            debug!(
                stub = %stub.display(),
                bytes,
                sha256 = %hex::encode(digest),
                "launcher stub prepended"
            );
        }

        let mut scratch = ZipArchive::new(BufReader::new(File::open(scratch_path)?))?;
        let mut writer = ZipWriter::new(BufWriter::new(output));

        let marker_ts = self.marker_timestamp();
        writer.add_directory(
            METADATA_DIR,
            SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
                .last_modified_time(marker_ts),
        )?;
        writer.start_file(
            MANIFEST_PATH,
            SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .compression_level(Some(9))
                .last_modified_time(marker_ts),
        )?;
        writer.write_all(&manifest.to_json()?)?;

        for (index, desc) in staged.iter().enumerate() {
            let options = SimpleFileOptions::default()
                .compression_method(desc.method.to_zip())
                .last_modified_time(desc.timestamp)
                .large_file(desc.size > u32::MAX as u64);
            let options = match desc.method {
                EntryMethod::Deflate => options.compression_level(Some(9)),
                EntryMethod::Store => options,
            };

            if desc.is_directory {
                writer.add_directory(desc.name.as_str(), options)?;
            } else {
                writer.start_file(desc.name.as_str(), options)?;
                let mut entry = scratch.by_index(index)?;
                stream::copy(&mut entry, &mut writer)?;
            }
        }

        writer.finish()?.flush()?;
        Ok(())
    }

    /// Timestamp for synthesized markers and the manifest entry
    fn marker_timestamp(&self) -> DateTime {
        if self.preserve_timestamps {
            DateTime::try_from(time::OffsetDateTime::now_utc())
                .unwrap_or_else(|_| default_entry_timestamp())
        } else {
            default_entry_timestamp()
        }
    }
}

/// Normalize an entry name to forward slashes with no leading slash
fn normalize_entry_name(name: &str) -> Result<String> {
    let normalized = name.replace('\\', "/");
    let normalized = normalized.trim_start_matches('/').trim_end_matches('/');
    if normalized.is_empty() {
        return Err(CapletError::Build("empty entry name in plan".to_string()));
    }
    Ok(normalized.to_string())
}
