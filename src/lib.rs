#![doc = include_str!("../README.md")]

pub mod archive;
pub mod error;
pub mod pipeline;
pub mod sbon;
pub mod sink;
pub mod stream;
pub mod table;

pub use crate::archive::Archive;
pub use crate::error::SbError;
pub use crate::sbon::Value;
pub use crate::table::ContentSource;
