//! # metasync archive
//!
//! Codec for the zip archives exchanged with the metadata API.
//!
//! This crate provides:
//! - `ExportArchive` and `ArchiveEntry` (path, content, stored CRC-32)
//! - Zip decoding with CRC verification and order-preserving encoding
//! - The base64 wrapping used on the wire

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archive;
mod error;

pub use archive::{crc32, ArchiveEntry, Compression, ExportArchive};
pub use error::{ArchiveError, ArchiveResult};
