//! Streams bytes from a source into an [`ExpandingSink`].
//!
//! Records the sink's position before writing, copies bytes in, and returns
//! the accounting the caller needs to build its own table entry.

use std::fs::File;
use std::path::Path;

use crate::error::SbError;
use crate::sink::ExpandingSink;
use crate::stream::positional_read;

/// Where `pump` should read bytes from.
pub enum Source<'a> {
    /// An in-memory block. `offset`/`length` are ignored for this variant.
    Bytes(&'a [u8]),
    /// An already-open file handle, read positionally so the caller's
    /// cursor elsewhere in the same file is undisturbed.
    Handle {
        file: &'a File,
        offset: u64,
        length: Option<u64>,
    },
    /// A host path, opened read-only for the duration of the call and
    /// closed on return (even on error).
    Path {
        path: &'a Path,
        offset: u64,
        length: Option<u64>,
    },
}

/// Result of a single `pump` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pumped {
    pub offset: u64,
    pub wrote: u64,
}

/// Copy bytes from `source` into `sink`, returning the sink offset the copy
/// started at and the number of bytes written.
pub fn pump(sink: &mut impl ExpandingSink, source: Source<'_>) -> Result<Pumped, SbError> {
    let start = sink.position();
    let wrote = match source {
        Source::Bytes(bytes) => {
            sink.write(bytes)?;
            bytes.len() as u64
        }
        Source::Handle {
            file,
            offset,
            length,
        } => pump_positional(sink, file, offset, length)?,
        Source::Path {
            path,
            offset,
            length,
        } => {
            let file = File::open(path)?;
            pump_positional(sink, &file, offset, length)?
        }
    };
    Ok(Pumped {
        offset: start,
        wrote,
    })
}

fn pump_positional(
    sink: &mut impl ExpandingSink,
    file: &File,
    offset: u64,
    length: Option<u64>,
) -> Result<u64, SbError> {
    let buf = positional_read(file, offset, length)?;
    sink.write(&buf)?;
    Ok(buf.len() as u64)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::sink::MemSink;

    #[test]
    fn pump_bytes_ignores_offset_length() {
        let mut sink = MemSink::new();
        let pumped = pump(&mut sink, Source::Bytes(b"hello")).unwrap();
        assert_eq!(pumped, Pumped { offset: 0, wrote: 5 });
        assert_eq!(sink.into_inner(), b"hello");
    }

    #[test]
    fn pump_path_with_offset_and_length() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut sink = MemSink::new();
        let pumped = pump(
            &mut sink,
            Source::Path {
                path: tmp.path(),
                offset: 2,
                length: Some(3),
            },
        )
        .unwrap();
        assert_eq!(pumped.wrote, 3);
        assert_eq!(sink.into_inner(), b"234");
    }

    #[test]
    fn pump_path_without_length_reads_to_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let mut sink = MemSink::new();
        let pumped = pump(
            &mut sink,
            Source::Path {
                path: tmp.path(),
                offset: 7,
                length: None,
            },
        )
        .unwrap();
        assert_eq!(pumped.wrote, 3);
        assert_eq!(sink.into_inner(), b"789");
    }

    #[test]
    fn pump_does_not_silently_truncate_short_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"short").unwrap();
        let mut sink = MemSink::new();
        let err = pump(
            &mut sink,
            Source::Path {
                path: tmp.path(),
                offset: 0,
                length: Some(100),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SbError::InvalidArgument(_)));
    }
}
