//! Errors

use std::io;

use thiserror::Error;

/// Errors generated from this library
#[derive(Error, Debug)]
pub enum SbError {
    #[error("std io error: {0}")]
    StdIo(#[from] io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("read or seek out of bounds")]
    OutOfBounds,

    #[error("File does not appear to be SBAsset6 format.")]
    NotAnArchive,

    #[error("corrupted or invalid metatable: {0}")]
    CorruptMetatable(String),

    #[error("malformed SBON data: {0}")]
    Malformed(String),

    #[error("archive is not loaded")]
    NotLoaded,

    #[error("virtual path not found: {0}")]
    NotFound(String),
}

impl From<SbError> for io::Error {
    fn from(value: SbError) -> Self {
        use SbError::*;
        match value {
            StdIo(io) => io,
            e @ InvalidArgument(_) => Self::new(io::ErrorKind::InvalidInput, e),
            e @ OutOfBounds => Self::new(io::ErrorKind::UnexpectedEof, e),
            e @ NotAnArchive => Self::new(io::ErrorKind::InvalidData, e),
            e @ CorruptMetatable(_) => Self::new(io::ErrorKind::InvalidData, e),
            e @ Malformed(_) => Self::new(io::ErrorKind::InvalidData, e),
            e @ NotLoaded => Self::new(io::ErrorKind::Other, e),
            e @ NotFound(_) => Self::new(io::ErrorKind::NotFound, e),
        }
    }
}
