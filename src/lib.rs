//! Caplet-rs: self-contained executable archive builder and launcher
//!
//! This library packages a program together with its dependency archives
//! into one runnable archive file, and at launch re-discovers, mounts, and
//! loads code from the dependency archives nested inside that file without
//! ever extracting them to disk. It combines:
//! - A two-pass archive builder (the leading manifest index summarizes
//!   content only known after every entry is written)
//! - A nested virtual filesystem mounting archives-within-archives to any
//!   depth
//! - A stacked resource locator addressing entries through the nesting
//!   chain
//! - A code loader resolving named units against ordered roots with
//!   first-match shadowing
//!
//! # Example
//!
//! ```no_run
//! use caplet_rs::{ArchiveBuilder, ArchivePlan, Launcher, OperationRegistry};
//!
//! // Build an archive embedding a dependency
//! let mut plan = ArchivePlan::new();
//! plan.add_library("target/dep1.arc")?;
//! ArchiveBuilder::new("app.arc")
//!     .entry_unit("main.Program")
//!     .build(&plan)?;
//!
//! // Launch it
//! let mut registry = OperationRegistry::new();
//! registry.register("main.Program", "main", |args| {
//!     println!("running with {:?}", args);
//!     Ok(())
//! });
//! Launcher::open("app.arc")?.launch(&registry, &["--flag".to_string()])?;
//! # Ok::<(), caplet_rs::error::CapletError>(())
//! ```

// Core modules
pub mod archive;
pub mod error;
pub mod launcher;
pub mod loader;
pub mod locator;
pub mod manifest;
pub mod stream;
pub mod vfs;

// Re-export commonly used types
pub use archive::{
    default_entry_timestamp, is_nested_archive_name, is_precompressed_name, ArchiveBuilder,
    ArchivePlan, EntryDescriptor, EntryMethod, PlanEntry,
};
pub use error::{CapletError, Result};
pub use launcher::{load_and_run, Launcher, DEFAULT_ENTRY_OPERATION};
pub use loader::{
    CodeLoader, OperationDef, OperationRegistry, OperationResult, ParamKind, ReturnKind,
    UnitDefinition,
};
pub use locator::{ByteSource, StackedLocator, LOCATOR_SCHEME};
pub use manifest::{
    EntryAttributes, ManifestIndex, LIBRARIES_DIR, MANIFEST_PATH, METADATA_DIR,
};
pub use vfs::{EntryInfo, Vfs, VirtualRoot};
