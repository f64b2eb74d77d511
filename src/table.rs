//! Virtual file table: virtual path -> deferred content source.
//!
//! `ContentSource` is a tagged variant rather than a stringly-typed `type`
//! field plus a grab-bag of optional fields, so `set` can't be handed a
//! malformed shape: the variant already encodes exactly which fields
//! exist.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::instrument;

use crate::error::SbError;
use crate::stream::positional_read;

/// A deferred source of file content.
#[derive(Clone)]
pub enum ContentSource {
    /// An entry carried forward from a loaded archive, not yet read.
    /// `archive` is the archive's own open file handle, shared so multiple
    /// entries (and the archive itself) can read it without fighting over
    /// ownership.
    FromArchive {
        archive: Arc<File>,
        offset: u64,
        length: u64,
    },
    /// Pull from a host path. If `length` is `None`, read from `offset` to
    /// EOF.
    FromPath {
        path: PathBuf,
        offset: Option<u64>,
        length: Option<u64>,
    },
    /// Pull from an already-open handle the caller retains ownership of.
    FromHandle {
        handle: Arc<File>,
        offset: Option<u64>,
        length: Option<u64>,
    },
    /// In-memory content. `offset`/`length` do not apply.
    FromBuffer(Arc<Vec<u8>>),
}

impl ContentSource {
    /// Short tag for progress logging, not for wire encoding.
    pub fn kind(&self) -> &'static str {
        match self {
            ContentSource::FromArchive { .. } => "archive",
            ContentSource::FromPath { .. } => "path",
            ContentSource::FromHandle { .. } => "handle",
            ContentSource::FromBuffer(_) => "buffer",
        }
    }
}

impl std::fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentSource::FromArchive { offset, length, .. } => f
                .debug_struct("FromArchive")
                .field("offset", offset)
                .field("length", length)
                .finish(),
            ContentSource::FromPath { path, offset, length } => f
                .debug_struct("FromPath")
                .field("path", path)
                .field("offset", offset)
                .field("length", length)
                .finish(),
            ContentSource::FromHandle { offset, length, .. } => f
                .debug_struct("FromHandle")
                .field("offset", offset)
                .field("length", length)
                .finish(),
            ContentSource::FromBuffer(buf) => f
                .debug_struct("FromBuffer")
                .field("len", &buf.len())
                .finish(),
        }
    }
}

/// Mapping from virtual path to deferred content source.
///
/// Does not own file handles or archive streams; callers remain responsible
/// for their lifetime.
#[derive(Debug, Default, Clone)]
pub struct FileTable {
    entries: IndexMap<String, ContentSource>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate virtual paths. Order is stable across calls without
    /// intervening mutation, and is the table's physical save order.
    pub fn list(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Fully replace the mapping for `path`. No merging with any prior
    /// entry occurs.
    pub fn set(&mut self, path: impl Into<String>, source: ContentSource) {
        self.entries.insert(path.into(), source);
    }

    /// Remove `path`. Absent keys silently succeed.
    pub fn delete(&mut self, path: &str) {
        self.entries.shift_remove(path);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContentSource)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `path`'s source to a full in-memory byte block.
    #[instrument(skip(self))]
    pub fn get(&self, path: &str) -> Result<Vec<u8>, SbError> {
        let source = self
            .entries
            .get(path)
            .ok_or_else(|| SbError::NotFound(path.to_string()))?;
        resolve(source)
    }
}

fn resolve(source: &ContentSource) -> Result<Vec<u8>, SbError> {
    match source {
        ContentSource::FromArchive {
            archive,
            offset,
            length,
        } => positional_read(archive, *offset, Some(*length)),
        ContentSource::FromPath {
            path,
            offset,
            length,
        } => {
            let file = File::open(path)?;
            positional_read(&file, offset.unwrap_or(0), *length)
        }
        ContentSource::FromHandle {
            handle,
            offset,
            length,
        } => positional_read(handle, offset.unwrap_or(0), *length),
        ContentSource::FromBuffer(buf) => Ok(buf.as_ref().clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn list_and_exists() {
        let mut table = FileTable::new();
        table.set("/a", ContentSource::FromBuffer(Arc::new(vec![1, 2, 3])));
        assert!(table.exists("/a"));
        assert!(!table.exists("/b"));
        assert_eq!(table.list(), vec!["/a".to_string()]);
    }

    #[test]
    fn set_fully_replaces_prior_entry() {
        let mut table = FileTable::new();
        table.set("/a", ContentSource::FromBuffer(Arc::new(vec![1])));
        table.set(
            "/a",
            ContentSource::FromPath {
                path: "/nonexistent".into(),
                offset: None,
                length: None,
            },
        );
        assert!(matches!(
            table.entries.get("/a").unwrap(),
            ContentSource::FromPath { .. }
        ));
    }

    #[test]
    fn delete_absent_key_silently_succeeds() {
        let mut table = FileTable::new();
        table.delete("/missing");
        assert!(table.is_empty());
    }

    #[test]
    fn get_unknown_path_is_not_found() {
        let table = FileTable::new();
        assert!(matches!(table.get("/missing"), Err(SbError::NotFound(_))));
    }

    #[test]
    fn get_from_buffer() {
        let mut table = FileTable::new();
        table.set("/a", ContentSource::FromBuffer(Arc::new(vec![9, 9, 9])));
        assert_eq!(table.get("/a").unwrap(), vec![9, 9, 9]);
    }

    #[test]
    fn get_from_path_without_length_reads_to_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut table = FileTable::new();
        table.set(
            "/a",
            ContentSource::FromPath {
                path: tmp.path().to_path_buf(),
                offset: Some(7),
                length: None,
            },
        );
        assert_eq!(table.get("/a").unwrap(), b"789");
    }

    #[test]
    fn get_from_handle_with_offset_and_length() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abcdefgh").unwrap();
        let handle = Arc::new(tmp.reopen().unwrap());
        let mut table = FileTable::new();
        table.set(
            "/a",
            ContentSource::FromHandle {
                handle,
                offset: Some(2),
                length: Some(3),
            },
        );
        assert_eq!(table.get("/a").unwrap(), b"cde");
    }
}
