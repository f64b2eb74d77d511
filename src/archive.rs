//! The SBAsset6 container: header, metatable, and the two-pass save
//! algorithm.
//!
//! Loading verifies the header magic, seeks to the trailing metatable, and
//! parses it. Saving writes a placeholder header, streams every entry body,
//! appends the metatable, then rewinds and patches the placeholder.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, info, instrument, trace};

use crate::error::SbError;
use crate::pipeline::{self, Pumped, Source};
use crate::sbon::{self, Value, ValueMap, DEFAULT_DEPTH_LIMIT};
use crate::sink::{ExpandingSink, FileSink};
use crate::stream::{positional_read, ByteStream, FileStream};
use crate::table::{ContentSource, FileTable};

const MAGIC: &[u8; 8] = b"SBAsset6";
const INDEX_MARKER: &[u8; 5] = b"INDEX";
const HEADER_LEN: u64 = 16;

/// One row of the metatable's file-table section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTableEntry {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

/// The trailing structured block: free-form metadata plus the file table.
#[derive(Debug, Clone, PartialEq)]
pub struct Metatable {
    pub metadata: ValueMap,
    pub entries: Vec<FileTableEntry>,
}

fn read_u64_be(stream: &mut impl ByteStream) -> Result<u64, SbError> {
    let bytes = stream.read(8)?;
    Ok(BigEndian::read_u64(&bytes))
}

fn write_u64_be(n: u64, out: &mut Vec<u8>) {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, n);
    out.extend_from_slice(&buf);
}

/// Read the 16-byte header: verify the magic, return the metatable offset.
pub fn read_header(stream: &mut impl ByteStream) -> Result<u64, SbError> {
    let magic = stream.read(8)?;
    if magic != MAGIC {
        return Err(SbError::NotAnArchive);
    }
    read_u64_be(stream)
}

/// Read the metatable starting at `offset`: the `"INDEX"` marker, the
/// metadata map, and the file-table entries.
pub fn read_metatable(stream: &mut impl ByteStream, offset: u64) -> Result<Metatable, SbError> {
    read_metatable_with_depth(stream, offset, DEFAULT_DEPTH_LIMIT)
}

fn read_metatable_with_depth(
    stream: &mut impl ByteStream,
    offset: u64,
    depth_limit: u32,
) -> Result<Metatable, SbError> {
    stream.seek_absolute(offset)?;
    let marker = stream.read(5)?;
    if marker != INDEX_MARKER {
        return Err(SbError::CorruptMetatable(
            "\"INDEX\" marker not found at metatable offset".into(),
        ));
    }

    let metadata = match sbon::read_dynamic(stream, depth_limit)? {
        Value::Map(m) => m,
        _ => return Err(SbError::CorruptMetatable("metadata is not a map".into())),
    };

    let n = sbon::read_varint(stream)?;
    let mut entries = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let path = sbon::read_string(stream)?;
        let offset = read_u64_be(stream)?;
        let length = read_u64_be(stream)?;
        entries.push(FileTableEntry {
            path,
            offset,
            length,
        });
    }

    Ok(Metatable { metadata, entries })
}

/// Serialize a metatable to its exact on-wire byte layout.
pub fn build_metatable(metadata: &ValueMap, entries: &[FileTableEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(INDEX_MARKER);
    sbon::write_dynamic(&Value::Map(metadata.clone()), &mut out);
    sbon::write_varint(entries.len() as u64, &mut out);
    for entry in entries {
        sbon::write_string(&entry.path, &mut out);
        write_u64_be(entry.offset, &mut out);
        write_u64_be(entry.length, &mut out);
    }
    out
}

/// An SBAsset6 archive handle.
///
/// Lifecycle: `Fresh` (no open stream, a possibly-empty table) ->
/// `Loaded` (stream open, table populated) -> arbitrary mutations -> `save`
/// (transient `Saving`) -> `Loaded` again, or `Fresh` after `close`. `save`
/// from `Fresh` is how an archive gets created from scratch.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    stream: Option<Arc<File>>,
    metatable_offset: Option<u64>,
    metadata: ValueMap,
    table: FileTable,
    depth_limit: u32,
    temp_suffix: String,
}

impl Archive {
    /// Create an unloaded, empty handle bound to `path`. Valid to populate
    /// from scratch and `save` without ever calling `load`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            metatable_offset: None,
            metadata: ValueMap::new(),
            table: FileTable::new(),
            depth_limit: DEFAULT_DEPTH_LIMIT,
            temp_suffix: ".tmp".to_string(),
        }
    }

    /// Create a handle bound to `path` and immediately `load` it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SbError> {
        let mut archive = Self::new(path);
        archive.load()?;
        Ok(archive)
    }

    /// Override the recursion depth enforced while decoding dynamic values.
    pub fn with_depth_limit(mut self, depth_limit: u32) -> Self {
        self.depth_limit = depth_limit;
        self
    }

    /// Override the suffix used for the temp file written during `save`.
    pub fn with_temp_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.temp_suffix = suffix.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.stream.is_some()
    }

    pub fn metadata(&self) -> &ValueMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ValueMap {
        &mut self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ValueMap) {
        self.metadata = metadata;
    }

    pub fn list(&self) -> Vec<String> {
        self.table.list()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.table.exists(path)
    }

    pub fn set(&mut self, path: impl Into<String>, source: ContentSource) {
        self.table.set(path, source);
    }

    pub fn delete(&mut self, path: &str) {
        self.table.delete(path);
    }

    pub fn get(&self, path: &str) -> Result<Vec<u8>, SbError> {
        self.table.get(path)
    }

    /// Read `length` bytes at `offset` from the currently-open archive
    /// stream. Fails [`SbError::NotLoaded`] if no stream is open.
    pub fn read_window(&self, offset: u64, length: u64) -> Result<Vec<u8>, SbError> {
        let file = self.stream.as_ref().ok_or(SbError::NotLoaded)?;
        positional_read(file, offset, Some(length))
    }

    /// Open the archive's file, verify its header, and populate the
    /// metadata map and virtual file table from its metatable.
    #[instrument(skip(self), fields(target = %self.path.display()))]
    pub fn load(&mut self) -> Result<(), SbError> {
        info!(event = "load.start", target = %self.path.display());

        let file = File::open(&self.path)?;
        let mut cursor = FileStream::from_file(file.try_clone()?)?;

        let metatable_offset = read_header(&mut cursor)?;
        debug!(event = "load.header", metatable_offset);

        let metatable = read_metatable_with_depth(&mut cursor, metatable_offset, self.depth_limit)?;
        info!(event = "load.metatable", entries = metatable.entries.len());

        let total = metatable.entries.len();
        debug!(event = "load.files", total);

        let shared = Arc::new(file);
        let mut table = FileTable::new();
        for (index, entry) in metatable.entries.into_iter().enumerate() {
            trace!(event = "load.file.progress", target = %entry.path, index);
            table.set(
                entry.path,
                ContentSource::FromArchive {
                    archive: shared.clone(),
                    offset: entry.offset,
                    length: entry.length,
                },
            );
        }

        self.stream = Some(shared);
        self.metatable_offset = Some(metatable_offset);
        self.metadata = metatable.metadata;
        self.table = table;

        info!(event = "load.done");
        Ok(())
    }

    /// Close the open stream, if any, clear the metatable offset and
    /// metadata, and replace the file table with a fresh empty one.
    /// Idempotent.
    pub fn close(&mut self) {
        self.stream = None;
        self.metatable_offset = None;
        self.metadata = ValueMap::new();
        self.table = FileTable::new();
        trace!(event = "close");
    }

    /// Two-pass rewrite: stream entry bodies to a sibling temp file, append
    /// a trailing metatable, back-patch the header's metatable pointer,
    /// rename the temp file over the original, then reload.
    #[instrument(skip(self), fields(target = %self.path.display()))]
    pub fn save(&mut self) -> Result<(), SbError> {
        info!(event = "save.start", target = %self.path.display());

        let temp_path = temp_path_for(&self.path, &self.temp_suffix);
        let temp_file = File::create(&temp_path)?;
        let mut sink = FileSink::create(temp_file);

        pipeline::pump(&mut sink, Source::Bytes(MAGIC))?;
        pipeline::pump(&mut sink, Source::Bytes(&[0u8; 8]))?;
        debug!(event = "save.header");

        let total = self.table.len();
        debug!(event = "save.files", total);

        let mut entries = Vec::with_capacity(total);
        for (index, (path, source)) in self.table.iter().enumerate() {
            trace!(event = "save.file.progress", target = %path, kind = source.kind(), index);
            let Pumped { offset, wrote } = pump_source(&mut sink, source)?;
            entries.push(FileTableEntry {
                path: path.to_string(),
                offset,
                length: wrote,
            });
        }

        let metatable_offset = sink.position();
        let metatable_bytes = build_metatable(&self.metadata, &entries);
        pipeline::pump(&mut sink, Source::Bytes(&metatable_bytes))?;
        info!(event = "save.metatable", metatable_offset);

        let mut patch = Vec::new();
        write_u64_be(metatable_offset, &mut patch);
        sink.patch(&patch, 8)?;

        drop(sink);
        self.close();

        std::fs::rename(&temp_path, &self.path)?;
        info!(event = "save.done");

        self.load()
    }
}

fn pump_source(sink: &mut FileSink, source: &ContentSource) -> Result<Pumped, SbError> {
    match source {
        ContentSource::FromArchive {
            archive,
            offset,
            length,
        } => pipeline::pump(
            sink,
            Source::Handle {
                file: archive,
                offset: *offset,
                length: Some(*length),
            },
        ),
        ContentSource::FromPath {
            path,
            offset,
            length,
        } => pipeline::pump(
            sink,
            Source::Path {
                path,
                offset: offset.unwrap_or(0),
                length: *length,
            },
        ),
        ContentSource::FromHandle {
            handle,
            offset,
            length,
        } => pipeline::pump(
            sink,
            Source::Handle {
                file: handle,
                offset: offset.unwrap_or(0),
                length: *length,
            },
        ),
        ContentSource::FromBuffer(buf) => pipeline::pump(sink, Source::Bytes(buf.as_slice())),
    }
}

fn temp_path_for(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceStream;

    fn header_bytes(metatable_offset: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        write_u64_be(metatable_offset, &mut out);
        out
    }

    #[test]
    fn header_decode() {
        let bytes = hex(b"53 42 41 73 73 65 74 36 00 00 00 00 00 00 00 67");
        let mut stream = SliceStream::new(bytes);
        assert_eq!(read_header(&mut stream).unwrap(), 0x67);
    }

    #[test]
    fn header_reject_on_bad_magic() {
        let bytes = hex(b"42 41 44 45 52 52 4F 52 00 00 00 00 00 00 00 00");
        let mut stream = SliceStream::new(bytes);
        let err = read_header(&mut stream).unwrap_err();
        assert!(matches!(err, SbError::NotAnArchive));
        assert_eq!(
            err.to_string(),
            "File does not appear to be SBAsset6 format."
        );
    }

    fn sample_metatable_bytes() -> Vec<u8> {
        hex(b"49 4E 44 45 58 \
              01 08 70 72 69 6F 72 69 74 79 \
              04 CA C0 DF 8F 7E \
              01 \
              1D 2F 75 6E 69 76 65 72 73 65 5F 73 65 72 76 65 \
              72 2E 63 6F 6E 66 69 67 2E 70 61 74 63 68 \
              00 00 00 00 00 00 00 10 \
              00 00 00 00 00 00 00 57")
    }

    fn sample_metadata_and_entry() -> (ValueMap, FileTableEntry) {
        let mut metadata = ValueMap::new();
        metadata.insert("priority".to_string(), Value::Int(9_999_999_999));
        let entry = FileTableEntry {
            path: "/universe_server.config.patch".to_string(),
            offset: 0x10,
            length: 0x57,
        };
        (metadata, entry)
    }

    #[test]
    fn metatable_decode() {
        let mut bytes = vec![0u8]; // pad so offset 1 points at "INDEX"
        bytes.extend_from_slice(&sample_metatable_bytes());
        let mut stream = SliceStream::new(bytes);

        let metatable = read_metatable(&mut stream, 1).unwrap();
        let (metadata, entry) = sample_metadata_and_entry();
        assert_eq!(metatable.metadata, metadata);
        assert_eq!(metatable.entries, vec![entry]);
    }

    #[test]
    fn metatable_build_roundtrip() {
        let (metadata, entry) = sample_metadata_and_entry();
        let built = build_metatable(&metadata, &[entry.clone()]);
        assert_eq!(built, sample_metatable_bytes());
        assert_eq!(built.len(), 69);

        let mut bytes = vec![0xAB]; // any byte prefix
        bytes.extend_from_slice(&built);
        let mut stream = SliceStream::new(bytes);
        let metatable = read_metatable(&mut stream, 1).unwrap();
        assert_eq!(metatable.metadata, metadata);
        assert_eq!(metatable.entries, vec![entry]);
    }

    #[test]
    fn dynamic_map_as_metadata_encoding() {
        let mut map = ValueMap::new();
        map.insert("key".into(), Value::String("val".into()));
        map.insert("key2".into(), Value::String("val2".into()));
        let mut out = Vec::new();
        sbon::write_dynamic(&Value::Map(map.clone()), &mut out);
        let mut stream = SliceStream::new(out);
        assert_eq!(sbon::read_dynamic(&mut stream, DEFAULT_DEPTH_LIMIT).unwrap(), Value::Map(map));
    }

    #[test]
    fn metatable_missing_index_marker_is_corrupt() {
        let bytes = vec![0u8; 16];
        let mut stream = SliceStream::new(bytes);
        assert!(matches!(
            read_metatable(&mut stream, 0),
            Err(SbError::CorruptMetatable(_))
        ));
    }

    #[test]
    fn empty_metatable_has_zero_count() {
        let metadata = ValueMap::new();
        let built = build_metatable(&metadata, &[]);
        // "INDEX" (5) + map tag+count (2) + file count varint (1)
        assert_eq!(built, {
            let mut v = INDEX_MARKER.to_vec();
            v.push(0x07); // map tag
            v.push(0x00); // map size 0
            v.push(0x00); // file count 0
            v
        });
    }

    fn hex(hex_bytes: &[u8]) -> Vec<u8> {
        // Byte fixtures below are written as space-separated hex pairs (with
        // embedded newlines for multi-line ones); parse that directly.
        std::str::from_utf8(hex_bytes)
            .unwrap()
            .split_whitespace()
            .map(|tok| u8::from_str_radix(tok, 16).unwrap())
            .collect()
    }

    #[test]
    fn header_bytes_helper_matches_manual_encoding() {
        assert_eq!(header_bytes(0x67), hex(b"53 42 41 73 73 65 74 36 00 00 00 00 00 00 00 67"));
    }
}
