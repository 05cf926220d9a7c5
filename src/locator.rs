//! Stacked resource locator
//!
//! Encodes "this resource lives inside archive A, itself inside archive B,
//! ..." as an explicit ordered stack of path segments. The first segment is
//! a plain filesystem path; each following segment descends into the
//! archive found at the previous segment's resolved location.
//!
//! The stack is the primary representation; the `caplet:` URI string form
//! exists only for crossing process or serialization boundaries. Parsing a
//! URI unwinds `!/` separators right to left (innermost segment split off
//! first), so a literal `!/` can only survive in the outermost filesystem
//! segment of a locator that never round-trips through the string form —
//! pass segments explicitly where that matters.

use crate::error::{CapletError, Result};
use crate::vfs::{Vfs, VirtualRoot};
use std::path::PathBuf;
use std::rc::Rc;

/// URI scheme used by the string encoding
pub const LOCATOR_SCHEME: &str = "caplet";

const SEPARATOR: &str = "!/";

/// Ordered chain of path segments descending through nested archives
///
/// Immutable once constructed; carries no open handles. Handles are opened
/// lazily at resolution time through a [`Vfs`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackedLocator {
    segments: Vec<String>,
}

impl StackedLocator {
    /// Build a locator from explicit segments
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(CapletError::EmptyLocator);
        }
        Ok(Self { segments })
    }

    /// Return a locator extended by one more nesting level
    pub fn descend<S: Into<String>>(&self, segment: S) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The ordered segments, outermost first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Encode as a `caplet:` URI string
    pub fn to_uri(&self) -> String {
        format!("{}:{}", LOCATOR_SCHEME, self.segments.join(SEPARATOR))
    }

    /// Parse a URI string back into a locator
    ///
    /// Separators are unwound right to left: the innermost segment is split
    /// off first, exactly as nested-archive URIs are traditionally
    /// re-parsed.
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let body = uri
            .strip_prefix(LOCATOR_SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(uri);
        if body.is_empty() {
            return Err(CapletError::EmptyLocator);
        }

        let mut stack = Vec::new();
        let mut rest = body;
        while let Some(mark) = rest.rfind(SEPARATOR) {
            stack.push(rest[mark + SEPARATOR.len()..].to_string());
            rest = &rest[..mark];
        }
        stack.push(rest.to_string());
        stack.reverse();
        Self::new(stack)
    }

    /// Open each intermediate archive in order and return a lazily-read
    /// byte source for the final segment
    ///
    /// Intermediate mounts are reused from the [`Vfs`] cache when the same
    /// archive was already opened. Fails with `NotFound` when any segment
    /// is missing and `NotAnArchive` when an intermediate segment is not a
    /// mountable archive.
    pub fn resolve(&self, vfs: &Vfs) -> Result<ByteSource> {
        let (first, rest) = self
            .segments
            .split_first()
            .ok_or(CapletError::EmptyLocator)?;

        if rest.is_empty() {
            let path = PathBuf::from(first);
            if !path.is_file() {
                return Err(CapletError::NotFound(first.clone()));
            }
            return Ok(ByteSource {
                inner: SourceInner::Filesystem(path),
            });
        }

        let (last, intermediates) = rest.split_last().ok_or(CapletError::EmptyLocator)?;
        let mut root = vfs.mount_path(first)?;
        for segment in intermediates {
            root = vfs.mount_nested(&root, segment)?;
        }
        if !root.contains(last) {
            return Err(CapletError::NotFound(format!("{}!/{}", root.key(), last)));
        }
        Ok(ByteSource {
            inner: SourceInner::Entry {
                root,
                name: last.clone(),
            },
        })
    }
}

enum SourceInner {
    Filesystem(PathBuf),
    Entry { root: Rc<VirtualRoot>, name: String },
}

/// Lazily-read handle to a resolved resource
pub struct ByteSource {
    inner: SourceInner,
}

impl ByteSource {
    /// Read the resource's full content
    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.inner {
            SourceInner::Filesystem(path) => Ok(std::fs::read(path)?),
            SourceInner::Entry { root, name } => root.read(name),
        }
    }

    /// Uncompressed size in bytes
    pub fn size(&self) -> Result<u64> {
        match &self.inner {
            SourceInner::Filesystem(path) => Ok(std::fs::metadata(path)?.len()),
            SourceInner::Entry { root, name } => Ok(root.entry_info(name)?.size),
        }
    }

    /// Modification timestamp, when the source records one
    pub fn modified(&self) -> Result<Option<time::OffsetDateTime>> {
        match &self.inner {
            SourceInner::Filesystem(path) => Ok(std::fs::metadata(path)?
                .modified()
                .ok()
                .map(time::OffsetDateTime::from)),
            SourceInner::Entry { root, name } => Ok(root.entry_info(name)?.modified),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_roundtrip() {
        let locator =
            StackedLocator::new(["/tmp/app.arc", "LIB/dep.arc", "data/config.json"]).unwrap();
        let uri = locator.to_uri();

        assert_eq!(uri, "caplet:/tmp/app.arc!/LIB/dep.arc!/data/config.json");
        assert_eq!(StackedLocator::parse_uri(&uri).unwrap(), locator);
    }

    #[test]
    fn test_parse_unwinds_right_to_left() {
        let locator = StackedLocator::parse_uri("caplet:/a.arc!/b.arc!/c.txt").unwrap();
        assert_eq!(locator.segments(), &["/a.arc", "b.arc", "c.txt"]);
    }

    #[test]
    fn test_parse_single_segment() {
        let locator = StackedLocator::parse_uri("caplet:/tmp/plain.txt").unwrap();
        assert_eq!(locator.segments(), &["/tmp/plain.txt"]);
    }

    #[test]
    fn test_parse_without_scheme() {
        let locator = StackedLocator::parse_uri("/a.arc!/c.txt").unwrap();
        assert_eq!(locator.segments(), &["/a.arc", "c.txt"]);
    }

    #[test]
    fn test_empty_locator_rejected() {
        assert!(matches!(
            StackedLocator::parse_uri("caplet:"),
            Err(CapletError::EmptyLocator)
        ));
        assert!(matches!(
            StackedLocator::new(Vec::<String>::new()),
            Err(CapletError::EmptyLocator)
        ));
    }

    #[test]
    fn test_descend() {
        let locator = StackedLocator::new(["/tmp/app.arc"]).unwrap();
        let deeper = locator.descend("LIB/dep.arc").descend("x.txt");
        assert_eq!(deeper.segments().len(), 3);
        assert_eq!(locator.segments().len(), 1);
    }
}
