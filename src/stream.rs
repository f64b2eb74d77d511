//! Random-access byte stream abstraction.
//!
//! [`ByteStream`] models the shared capability set of an in-memory block and
//! a file-backed source: read-advance, absolute seek, and relative seek. It
//! is a trait over the capability set rather than a concrete base type, so
//! SBON and the archive engine can be written once against either backing.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::trace;

use crate::error::SbError;

/// A random-access read port over a byte source of known, fixed length.
pub trait ByteStream {
    /// Total length of the underlying source, established at open time.
    fn len(&self) -> u64;

    /// Current cursor position.
    fn position(&self) -> u64;

    /// Read the next `n` bytes and advance the cursor by `n`.
    ///
    /// Fails with [`SbError::InvalidArgument`] if `n == 0`, and
    /// [`SbError::OutOfBounds`] if `position + n` exceeds `len()`.
    fn read(&mut self, n: usize) -> Result<Vec<u8>, SbError>;

    /// Move the cursor by `delta` bytes relative to its current position.
    fn seek_relative(&mut self, delta: i64) -> Result<(), SbError>;

    /// Set the cursor to an absolute position.
    ///
    /// Fails with [`SbError::OutOfBounds`] if `position > len()`.
    fn seek_absolute(&mut self, position: u64) -> Result<(), SbError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only cursor over an owned, in-memory byte block.
///
/// Does not support negative relative seeks: the block has no file-like
/// notion of "before the start", so a negative delta is always a contract
/// violation.
#[derive(Debug, Clone)]
pub struct SliceStream {
    data: Vec<u8>,
    cursor: u64,
}

impl SliceStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    /// The unread suffix, without consuming it.
    pub fn current_buffer(&self) -> &[u8] {
        &self.data[self.cursor as usize..]
    }

    /// Reset the cursor to the start.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl ByteStream for SliceStream {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, SbError> {
        if n == 0 {
            return Err(SbError::InvalidArgument("read length must be >= 1".into()));
        }
        let end = self
            .cursor
            .checked_add(n as u64)
            .ok_or(SbError::OutOfBounds)?;
        if end > self.len() {
            return Err(SbError::OutOfBounds);
        }
        let start = self.cursor as usize;
        let out = self.data[start..end as usize].to_vec();
        self.cursor = end;
        Ok(out)
    }

    fn seek_relative(&mut self, delta: i64) -> Result<(), SbError> {
        if delta < 0 {
            return Err(SbError::OutOfBounds);
        }
        self.seek_absolute(self.cursor + delta as u64)
    }

    fn seek_absolute(&mut self, position: u64) -> Result<(), SbError> {
        if position > self.len() {
            return Err(SbError::OutOfBounds);
        }
        self.cursor = position;
        Ok(())
    }
}

/// Cursor over an open, file-backed byte source.
///
/// The file length is statted once at open time; a read past that cached
/// length fails `OutOfBounds` even if the file has since grown on disk.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    len: u64,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SbError> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(path = %path.as_ref().display(), len, "opened file stream");
        Ok(Self { file, len })
    }

    pub fn from_file(file: File) -> Result<Self, SbError> {
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

/// Read `length` bytes at `offset` from `file` (to EOF if `length` is
/// `None`) via true positional I/O, without touching the file's shared
/// cursor. `File::try_clone` is not a substitute for this: a cloned
/// handle shares the same underlying file offset as the original (and
/// every other clone of it) on both Unix and Windows, so seeking a clone
/// moves the cursor every other holder of that handle sees too. This goes
/// straight to `read_at`/`seek_read`, which take the offset per call and
/// never move any cursor at all. Shared by the virtual file table, the
/// pipeline, and the archive engine's `read_window`.
pub(crate) fn positional_read(
    file: &File,
    offset: u64,
    length: Option<u64>,
) -> Result<Vec<u8>, SbError> {
    let size = file.metadata()?.len();
    let length = match length {
        Some(len) => len,
        None => {
            if offset > size {
                return Err(SbError::InvalidArgument(
                    "offset exceeds source length".into(),
                ));
            }
            // `size - offset`, not the inverted `offset - size`.
            size - offset
        }
    };
    let mut buf = vec![0u8; length as usize];
    read_exact_at(file, &mut buf, offset).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SbError::InvalidArgument("source shorter than requested window".into())
        } else {
            SbError::StdIo(e)
        }
    })?;
    Ok(buf)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut total = 0usize;
    while total < buf.len() {
        let read = file.seek_read(&mut buf[total..], offset + total as u64)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "failed to fill whole buffer",
            ));
        }
        total += read;
    }
    Ok(())
}

impl ByteStream for FileStream {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        // `stream_position` never fails for a plain `File`'s current offset.
        self.file
            .stream_position()
            .expect("file position is always available")
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>, SbError> {
        if n == 0 {
            return Err(SbError::InvalidArgument("read length must be >= 1".into()));
        }
        let pos = self.position();
        let end = pos.checked_add(n as u64).ok_or(SbError::OutOfBounds)?;
        if end > self.len {
            return Err(SbError::OutOfBounds);
        }
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn seek_relative(&mut self, delta: i64) -> Result<(), SbError> {
        let pos = self.position() as i128 + delta as i128;
        if pos < 0 || pos as u64 > self.len {
            return Err(SbError::OutOfBounds);
        }
        self.file.seek(SeekFrom::Current(delta))?;
        Ok(())
    }

    fn seek_absolute(&mut self, position: u64) -> Result<(), SbError> {
        if position > self.len {
            return Err(SbError::OutOfBounds);
        }
        self.file.seek(SeekFrom::Start(position))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_read_advances_cursor() {
        let mut s = SliceStream::new(vec![1, 2, 3, 4]);
        assert_eq!(s.read(2).unwrap(), vec![1, 2]);
        assert_eq!(s.position(), 2);
        assert_eq!(s.read(2).unwrap(), vec![3, 4]);
    }

    #[test]
    fn slice_read_zero_is_invalid_argument() {
        let mut s = SliceStream::new(vec![1, 2, 3]);
        assert!(matches!(s.read(0), Err(SbError::InvalidArgument(_))));
    }

    #[test]
    fn slice_read_past_end_is_out_of_bounds() {
        let mut s = SliceStream::new(vec![1, 2, 3]);
        assert!(matches!(s.read(4), Err(SbError::OutOfBounds)));
    }

    #[test]
    fn slice_negative_relative_seek_is_out_of_bounds() {
        let mut s = SliceStream::new(vec![1, 2, 3]);
        s.seek_absolute(1).unwrap();
        assert!(matches!(s.seek_relative(-1), Err(SbError::OutOfBounds)));
    }

    #[test]
    fn slice_seek_absolute_past_end_is_out_of_bounds() {
        let mut s = SliceStream::new(vec![1, 2, 3]);
        assert!(matches!(s.seek_absolute(4), Err(SbError::OutOfBounds)));
        assert!(s.seek_absolute(3).is_ok());
    }

    #[test]
    fn slice_current_buffer_and_reset() {
        let mut s = SliceStream::new(vec![1, 2, 3, 4]);
        s.read(2).unwrap();
        assert_eq!(s.current_buffer(), &[3, 4]);
        s.reset();
        assert_eq!(s.position(), 0);
        assert_eq!(s.current_buffer(), &[1, 2, 3, 4]);
    }
}
