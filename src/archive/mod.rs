mod builder;
mod entry;

pub use builder::{ArchiveBuilder, ArchivePlan, PlanEntry};
pub use entry::{
    default_entry_timestamp, entry_timestamp, is_nested_archive_name, is_precompressed_name,
    EntryDescriptor, EntryMethod,
};
