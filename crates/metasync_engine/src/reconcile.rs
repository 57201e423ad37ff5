//! Archive reconciliation against a local working tree.
//!
//! For every entry of the remote archive, in order, the mapped local file is
//! read and its CRC-32 compared with the entry's stored checksum. A
//! mismatch means the local copy wins and its bytes replace the entry's; a
//! match keeps the remote entry untouched. There is no timestamp or
//! three-way comparison, and CRC-32 collisions go undetected.
//!
//! A single missing or unreadable local file aborts the whole operation.

use crate::error::{SyncError, SyncResult};
use metasync_archive::{crc32, ArchiveEntry, ExportArchive};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maps archive paths to working-tree paths.
///
/// `remote_prefix` is stripped from the archive path and the remainder is
/// placed under `local_prefix`. The default maps `unpackaged/classes/Foo.cls`
/// to `src/classes/Foo.cls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Prefix every archive path is expected to carry.
    pub remote_prefix: String,
    /// Directory, relative to the working-tree root, that mirrors the prefix.
    pub local_prefix: PathBuf,
}

impl PathMapping {
    /// Creates a mapping.
    pub fn new(remote_prefix: impl Into<String>, local_prefix: impl Into<PathBuf>) -> Self {
        Self {
            remote_prefix: remote_prefix.into(),
            local_prefix: local_prefix.into(),
        }
    }

    /// Maps an archive path to a path relative to the working-tree root.
    ///
    /// Paths outside the prefix, paths with nothing after it, and paths
    /// containing `..` are rejected.
    pub fn to_local(&self, remote_path: &str) -> SyncResult<PathBuf> {
        let rest = remote_path
            .strip_prefix(self.remote_prefix.as_str())
            .ok_or_else(|| SyncError::UnmappedPath(remote_path.to_string()))?;

        let mut local = self.local_prefix.clone();
        let mut pushed = false;
        for component in rest.split('/') {
            match component {
                "" | "." => continue,
                ".." => return Err(SyncError::UnmappedPath(remote_path.to_string())),
                name => {
                    local.push(name);
                    pushed = true;
                }
            }
        }

        if !pushed {
            return Err(SyncError::UnmappedPath(remote_path.to_string()));
        }
        Ok(local)
    }
}

impl Default for PathMapping {
    fn default() -> Self {
        Self::new("unpackaged/", "src")
    }
}

/// Read access to the local working tree.
pub trait WorkingTree: Send + Sync {
    /// Reads a file, `path` being relative to the tree root.
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// A working tree rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct FsWorkingTree {
    root: PathBuf,
}

impl FsWorkingTree {
    /// Creates a tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkingTree for FsWorkingTree {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.root.join(path))
    }
}

/// An in-memory working tree for testing.
#[derive(Debug, Default)]
pub struct MemoryWorkingTree {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryWorkingTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Removes a file.
    pub fn remove(&self, path: &Path) {
        self.files.write().remove(path);
    }
}

impl WorkingTree for MemoryWorkingTree {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
    }
}

/// Which side a reconciled entry was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// The local file differs from the remote checksum; its bytes are used.
    Local,
    /// The checksums match; the remote entry is kept as is.
    Remote,
}

/// One entry of a reconciled archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledEntry {
    /// The emitted entry, always under the remote path.
    pub entry: ArchiveEntry,
    /// Where the content came from.
    pub source: EntrySource,
    /// Working-tree path the entry was compared with.
    pub local_path: PathBuf,
}

/// The result of reconciling a remote archive.
///
/// Holds exactly one entry per remote entry, in remote order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciledArchive {
    entries: Vec<ReconciledEntry>,
}

impl ReconciledArchive {
    /// Entries in remote order.
    pub fn entries(&self) -> &[ReconciledEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry paths in order.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.entry.path()).collect()
    }

    /// Number of entries taken from the working tree.
    pub fn local_count(&self) -> usize {
        self.count(EntrySource::Local)
    }

    /// Number of entries kept from the remote archive.
    pub fn remote_count(&self) -> usize {
        self.count(EntrySource::Remote)
    }

    fn count(&self, source: EntrySource) -> usize {
        self.entries.iter().filter(|e| e.source == source).count()
    }

    /// Returns the entries as a plain archive.
    pub fn to_archive(&self) -> ExportArchive {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }

    /// Consumes the result and returns a plain archive.
    pub fn into_archive(self) -> ExportArchive {
        self.entries.into_iter().map(|e| e.entry).collect()
    }

    /// Encodes the entries as a zip archive.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        self.to_archive().encode().map_err(SyncError::ArchiveEncode)
    }

    /// Encodes the entries as a base64 zip archive.
    pub fn to_base64(&self) -> SyncResult<String> {
        self.to_archive()
            .to_base64()
            .map_err(SyncError::ArchiveEncode)
    }
}

/// Reconciles remote archives against a working tree.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    mapping: PathMapping,
}

impl Reconciler {
    /// Creates a reconciler with the given path mapping.
    pub fn new(mapping: PathMapping) -> Self {
        Self { mapping }
    }

    /// Path mapping in use.
    pub fn mapping(&self) -> &PathMapping {
        &self.mapping
    }

    /// Reconciles `remote` against `tree`.
    pub fn reconcile<W: WorkingTree + ?Sized>(
        &self,
        remote: &ExportArchive,
        tree: &W,
    ) -> SyncResult<ReconciledArchive> {
        let mut entries = Vec::with_capacity(remote.len());

        for entry in remote.entries() {
            let local_path = self.mapping.to_local(entry.path())?;
            let local = tree
                .read(&local_path)
                .map_err(|source| SyncError::LocalFileMissing {
                    path: local_path.clone(),
                    source,
                })?;

            let local_checksum = crc32(&local);
            let reconciled = if local_checksum != entry.checksum() {
                debug!(
                    path = entry.path(),
                    remote_crc = entry.checksum(),
                    local_crc = local_checksum,
                    "local copy differs"
                );
                ReconciledEntry {
                    entry: ArchiveEntry::new(entry.path(), local),
                    source: EntrySource::Local,
                    local_path,
                }
            } else {
                ReconciledEntry {
                    entry: entry.clone(),
                    source: EntrySource::Remote,
                    local_path,
                }
            };
            entries.push(reconciled);
        }

        let result = ReconciledArchive { entries };
        info!(
            entries = result.len(),
            local = result.local_count(),
            remote = result.remote_count(),
            "reconciled archive"
        );
        Ok(result)
    }

    /// Reconciles `remote` against the directory `local_root`.
    pub fn reconcile_dir(
        &self,
        remote: &ExportArchive,
        local_root: &Path,
    ) -> SyncResult<ReconciledArchive> {
        self.reconcile(remote, &FsWorkingTree::new(local_root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn remote(entries: &[(&str, &[u8])]) -> ExportArchive {
        entries
            .iter()
            .map(|(p, c)| ArchiveEntry::new(*p, c.to_vec()))
            .collect()
    }

    #[test]
    fn default_mapping() {
        let mapping = PathMapping::default();
        assert_eq!(
            mapping.to_local("unpackaged/classes/Foo.cls").unwrap(),
            Path::new("src").join("classes").join("Foo.cls")
        );
    }

    #[test]
    fn mapping_rejects_foreign_and_escaping_paths() {
        let mapping = PathMapping::default();
        for path in [
            "other/classes/Foo.cls",
            "unpackaged/../secrets",
            "unpackaged/classes/../../x",
            "unpackaged/",
            "unpackaged",
        ] {
            assert!(
                matches!(mapping.to_local(path), Err(SyncError::UnmappedPath(_))),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn matching_checksum_keeps_remote_entry() {
        let archive = remote(&[("unpackaged/classes/Foo.cls", b"A")]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/classes/Foo.cls", b"A".to_vec());

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        assert_eq!(result.entries()[0].source, EntrySource::Remote);
        assert_eq!(&result.entries()[0].entry, &archive.entries()[0]);
    }

    #[test]
    fn differing_checksum_takes_local_bytes() {
        let archive = remote(&[("unpackaged/pages/Bar.page", b"remote")]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/pages/Bar.page", b"B".to_vec());

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        let entry = &result.entries()[0];
        assert_eq!(entry.source, EntrySource::Local);
        assert_eq!(entry.entry.path(), "unpackaged/pages/Bar.page");
        assert_eq!(entry.entry.content(), b"B");
        assert_eq!(entry.entry.checksum(), crc32(b"B"));
        assert_eq!(entry.local_path, Path::new("src").join("pages").join("Bar.page"));
    }

    #[test]
    fn stored_checksum_decides_not_content() {
        // The remote content is identical to the local file, but the stored
        // checksum is not; only the checksum comparison counts.
        let archive = ExportArchive::new(vec![ArchiveEntry::with_checksum(
            "unpackaged/classes/Foo.cls",
            b"A".to_vec(),
            111,
        )]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/classes/Foo.cls", b"A".to_vec());

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        assert_eq!(result.entries()[0].source, EntrySource::Local);
        assert_eq!(result.entries()[0].entry.checksum(), crc32(b"A"));
    }

    #[test]
    fn missing_local_file_aborts() {
        let archive = remote(&[
            ("unpackaged/classes/Foo.cls", b"A"),
            ("unpackaged/classes/Gone.cls", b"B"),
            ("unpackaged/classes/Baz.cls", b"C"),
        ]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/classes/Foo.cls", b"A".to_vec());
        tree.insert("src/classes/Baz.cls", b"C".to_vec());

        let err = Reconciler::default().reconcile(&archive, &tree).unwrap_err();
        match err {
            SyncError::LocalFileMissing { path, source } => {
                assert_eq!(path, Path::new("src").join("classes").join("Gone.cls"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_paths_are_not_collapsed() {
        let archive = remote(&[
            ("unpackaged/classes/Foo.cls", b"A"),
            ("unpackaged/classes/Foo.cls", b"old"),
        ]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/classes/Foo.cls", b"A".to_vec());

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.entries()[0].source, EntrySource::Remote);
        assert_eq!(result.entries()[1].source, EntrySource::Local);
    }

    #[test]
    fn empty_archive_reconciles_to_empty() {
        let result = Reconciler::default()
            .reconcile(&ExportArchive::default(), &MemoryWorkingTree::new())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn reconcile_dir_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/classes")).unwrap();
        std::fs::write(dir.path().join("src/classes/Foo.cls"), b"edited").unwrap();

        let archive = remote(&[("unpackaged/classes/Foo.cls", b"original")]);
        let result = Reconciler::default()
            .reconcile_dir(&archive, dir.path())
            .unwrap();
        assert_eq!(result.local_count(), 1);
        assert_eq!(result.entries()[0].entry.content(), b"edited");
    }

    #[test]
    fn encoded_result_round_trips() {
        let archive = remote(&[
            ("unpackaged/classes/Foo.cls", b"A"),
            ("unpackaged/pages/Bar.page", b"remote"),
        ]);
        let tree = MemoryWorkingTree::new();
        tree.insert("src/classes/Foo.cls", b"A".to_vec());
        tree.insert("src/pages/Bar.page", b"B".to_vec());

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        let decoded = ExportArchive::from_base64(&result.to_base64().unwrap()).unwrap();
        assert_eq!(decoded, result.to_archive());
        assert_eq!(decoded.get("unpackaged/pages/Bar.page").unwrap().content(), b"B");
    }

    #[test]
    fn entry_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EntrySource::Local).unwrap(), "\"local\"");
        assert_eq!(serde_json::to_string(&EntrySource::Remote).unwrap(), "\"remote\"");
    }

    fn case_strategy() -> impl Strategy<Value = Vec<(Vec<u8>, Vec<u8>, bool)>> {
        prop::collection::vec(
            (
                prop::collection::vec(any::<u8>(), 0..32),
                prop::collection::vec(any::<u8>(), 0..32),
                any::<bool>(),
            ),
            0..12,
        )
    }

    fn build_case(cases: &[(Vec<u8>, Vec<u8>, bool)]) -> (ExportArchive, MemoryWorkingTree) {
        let tree = MemoryWorkingTree::new();
        let archive = cases
            .iter()
            .enumerate()
            .map(|(i, (remote, other, same))| {
                let local = if *same { remote.clone() } else { other.clone() };
                tree.insert(format!("src/classes/C{i}.cls"), local);
                ArchiveEntry::new(format!("unpackaged/classes/C{i}.cls"), remote.clone())
            })
            .collect();
        (archive, tree)
    }

    proptest! {
        #[test]
        fn output_is_a_function_of_checksum_comparison(cases in case_strategy()) {
            let (archive, tree) = build_case(&cases);
            let result = Reconciler::default().reconcile(&archive, &tree).unwrap();

            prop_assert_eq!(result.len(), archive.len());
            for (remote, out) in archive.entries().iter().zip(result.entries()) {
                let local = tree.read(&out.local_path).unwrap();
                if crc32(&local) == remote.checksum() {
                    prop_assert_eq!(&out.entry, remote);
                    prop_assert_eq!(out.source, EntrySource::Remote);
                } else {
                    prop_assert_eq!(out.entry.content(), local.as_slice());
                    prop_assert_eq!(out.entry.path(), remote.path());
                    prop_assert_eq!(out.source, EntrySource::Local);
                }
            }
        }

        #[test]
        fn order_is_preserved_and_result_is_idempotent(cases in case_strategy()) {
            let (archive, tree) = build_case(&cases);
            let reconciler = Reconciler::default();

            let first = reconciler.reconcile(&archive, &tree).unwrap();
            let second = reconciler.reconcile(&archive, &tree).unwrap();

            prop_assert_eq!(first.paths(), archive.paths());
            prop_assert_eq!(first, second);
        }
    }
}
