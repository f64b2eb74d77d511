//! Append-only byte sink abstraction.
//!
//! The sink advances an append cursor as data is written, and exposes a
//! separate `patch` operation for the file variant that seeks, overwrites a
//! prior range, and returns to the append cursor without disturbing it.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use crate::error::SbError;

/// Append-only byte sink.
pub trait ExpandingSink {
    /// Append `bytes`, returning the new end position.
    fn write(&mut self, bytes: &[u8]) -> Result<u64, SbError>;

    /// Current write offset (bytes written so far, unaffected by patches).
    fn position(&self) -> u64;
}

/// In-memory growing buffer sink.
#[derive(Debug, Default)]
pub struct MemSink {
    buf: Vec<u8>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl ExpandingSink for MemSink {
    fn write(&mut self, bytes: &[u8]) -> Result<u64, SbError> {
        self.buf.extend_from_slice(bytes);
        Ok(self.buf.len() as u64)
    }

    fn position(&self) -> u64 {
        self.buf.len() as u64
    }
}

/// File-backed sink. `position` always reflects the append cursor, even
/// across calls to `patch`.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    position: u64,
}

impl FileSink {
    pub fn create(file: File) -> Self {
        Self { file, position: 0 }
    }

    /// Overwrite `bytes` at `offset`, then return to the append cursor.
    ///
    /// `offset..offset+bytes.len()` must lie within `[0, position())`.
    pub fn patch(&mut self, bytes: &[u8], offset: u64) -> Result<(), SbError> {
        if offset + bytes.len() as u64 > self.position {
            return Err(SbError::InvalidArgument(
                "patch range exceeds written extent".into(),
            ));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file.seek(SeekFrom::Start(self.position))?;
        Ok(())
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl ExpandingSink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> Result<u64, SbError> {
        self.file.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(self.position)
    }

    fn position(&self) -> u64 {
        self.position
    }
}
