//! Working-tree and archive fixtures.

use chrono::{DateTime, Utc};
use metasync_archive::{ArchiveEntry, ExportArchive};
use metasync_engine::FsWorkingTree;
use metasync_protocol::MetadataItem;
use std::path::Path;
use tempfile::TempDir;

/// A working tree in a temporary directory, removed on drop.
pub struct WorkingTreeFixture {
    dir: TempDir,
}

impl WorkingTreeFixture {
    /// Creates an empty working tree.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Root directory of the tree.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, relative: &str, content: impl AsRef<[u8]>) -> &Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create directories");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
        self
    }

    /// Removes a file.
    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.dir.path().join(relative)).expect("Failed to remove fixture file");
    }

    /// A working tree rooted at this directory.
    pub fn tree(&self) -> FsWorkingTree {
        FsWorkingTree::new(self.dir.path())
    }
}

impl Default for WorkingTreeFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds export archives entry by entry.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry with a computed checksum.
    pub fn entry(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.entries.push(ArchiveEntry::new(path, content));
        self
    }

    /// Adds an entry whose stored checksum is `checksum`.
    pub fn entry_with_checksum(mut self, path: &str, content: impl Into<Vec<u8>>, checksum: u32) -> Self {
        self.entries.push(ArchiveEntry::with_checksum(path, content, checksum));
        self
    }

    /// Returns the archive.
    pub fn build(self) -> ExportArchive {
        ExportArchive::new(self.entries)
    }
}

/// Builds a listed metadata item from RFC 3339 timestamps.
pub fn metadata_item(id: &str, file_name: &str, created: &str, modified: &str) -> MetadataItem {
    MetadataItem {
        id: id.to_string(),
        file_name: file_name.to_string(),
        created_date: parse_utc(created),
        last_modified_date: parse_utc(modified),
    }
}

fn parse_utc(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("Invalid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Ready-made sync scenarios.
pub mod scenarios {
    use super::*;
    use metasync_archive::crc32;

    /// One file unchanged locally, one file edited locally.
    ///
    /// The archive stores its paths under `src/`, the same prefix the
    /// working tree uses, so it reconciles with `PathMapping::new("src/", "src")`.
    /// The expected result keeps the remote `Foo.cls` and takes `"B"` for
    /// `Bar.page`.
    pub fn one_unchanged_one_edited() -> (ExportArchive, WorkingTreeFixture) {
        let archive = ArchiveBuilder::new()
            .entry_with_checksum("src/classes/Foo.cls", "A", crc32(b"A"))
            .entry_with_checksum("src/pages/Bar.page", "<apex:page/>", 222)
            .build();

        let fixture = WorkingTreeFixture::new();
        fixture
            .write("src/classes/Foo.cls", "A")
            .write("src/pages/Bar.page", "B");

        (archive, fixture)
    }

    /// A typical export under `unpackaged/` with a matching working tree
    /// under `src/`, every file unchanged.
    pub fn clean_checkout(file_count: usize) -> (ExportArchive, WorkingTreeFixture) {
        let fixture = WorkingTreeFixture::new();
        let mut builder = ArchiveBuilder::new();
        for i in 0..file_count {
            let content = format!("public class C{} {{}}", i);
            builder = builder.entry(&format!("unpackaged/classes/C{}.cls", i), content.clone());
            fixture.write(&format!("src/classes/C{}.cls", i), content);
        }
        (builder.build(), fixture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_writes_nested_files() {
        let fixture = WorkingTreeFixture::new();
        fixture.write("src/classes/Foo.cls", "A");
        assert_eq!(
            std::fs::read(fixture.root().join("src/classes/Foo.cls")).unwrap(),
            b"A"
        );
    }

    #[test]
    fn clean_checkout_matches() {
        let (archive, fixture) = scenarios::clean_checkout(3);
        assert_eq!(archive.len(), 3);
        assert!(fixture.root().join("src/classes/C2.cls").exists());
    }
}
