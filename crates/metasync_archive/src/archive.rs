//! Export archive model and zip codec.

use crate::error::{ArchiveError, ArchiveResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Computes the CRC-32 (IEEE) checksum stored by zip archives.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// One file of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    path: String,
    content: Vec<u8>,
    checksum: u32,
}

impl ArchiveEntry {
    /// Creates an entry, computing its checksum from `content`.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            checksum: crc32(&content),
            content,
        }
    }

    /// Creates an entry with a checksum taken from elsewhere (e.g. a zip
    /// central directory). The checksum is not recomputed.
    pub fn with_checksum(path: impl Into<String>, content: impl Into<Vec<u8>>, checksum: u32) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            checksum,
        }
    }

    /// Archive path, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File content.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Stored checksum.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Returns true if the stored checksum matches the content.
    pub fn is_intact(&self) -> bool {
        crc32(&self.content) == self.checksum
    }
}

/// Compression used when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression.
    Stored,
    /// Deflate.
    #[default]
    Deflated,
}

impl From<Compression> for CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// An ordered, read-only set of archive entries.
///
/// Entry order is the order of the zip central directory and is preserved
/// through every transformation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportArchive {
    entries: Vec<ArchiveEntry>,
}

impl ExportArchive {
    /// Creates an archive from entries, keeping their order.
    pub fn new(entries: Vec<ArchiveEntry>) -> Self {
        Self { entries }
    }

    /// Entries in archive order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Consumes the archive and returns its entries.
    pub fn into_entries(self) -> Vec<ArchiveEntry> {
        self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry paths in archive order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(ArchiveEntry::path).collect()
    }

    /// Returns the first entry with the given path.
    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Decodes a zip archive.
    ///
    /// Directory entries are skipped. Each entry's content is read in full,
    /// which makes the zip reader verify it against the stored CRC-32.
    pub fn decode(bytes: &[u8]) -> ArchiveResult<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(zip.len());

        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let path = file.name().to_string();
            let checksum = file.crc32();
            let mut content = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut content)?;
            entries.push(ArchiveEntry::with_checksum(path, content, checksum));
        }

        Ok(Self { entries })
    }

    /// Decodes a base64-encoded zip archive. ASCII whitespace in the
    /// payload is ignored.
    pub fn from_base64(payload: &str) -> ArchiveResult<Self> {
        let cleaned: Vec<u8> = payload
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let bytes = STANDARD.decode(cleaned)?;
        Self::decode(&bytes)
    }

    /// Encodes the archive as a deflate-compressed zip.
    pub fn encode(&self) -> ArchiveResult<Vec<u8>> {
        self.encode_with(Compression::default())
    }

    /// Encodes the archive as a zip with the given compression.
    pub fn encode_with(&self, compression: Compression) -> ArchiveResult<Vec<u8>> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.path.as_str()) {
                return Err(ArchiveError::DuplicatePath(entry.path.clone()));
            }
        }

        let options = SimpleFileOptions::default().compression_method(compression.into());
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            writer.start_file(entry.path.clone(), options)?;
            writer.write_all(&entry.content)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Encodes the archive as a base64 zip, the form the server accepts.
    pub fn to_base64(&self) -> ArchiveResult<String> {
        Ok(STANDARD.encode(self.encode()?))
    }
}

impl FromIterator<ArchiveEntry> for ExportArchive {
    fn from_iter<I: IntoIterator<Item = ArchiveEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
