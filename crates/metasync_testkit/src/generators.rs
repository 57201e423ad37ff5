//! Property-based test generators using proptest.

use metasync_archive::{ArchiveEntry, ExportArchive};
use proptest::prelude::*;

/// Metadata folders used in generated paths.
const FOLDERS: [&str; 4] = ["classes", "pages", "triggers", "components"];

/// Strategy for file contents.
pub fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for archive-relative file names below a metadata folder.
pub fn relative_path_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(FOLDERS.to_vec()),
        prop::string::string_regex("[A-Z][A-Za-z0-9_]{0,15}").expect("Invalid regex"),
    )
        .prop_map(|(folder, name)| format!("{}/{}.cls", folder, name))
}

/// Strategy for archives with unique paths under `unpackaged/`.
pub fn archive_strategy(max_entries: usize) -> impl Strategy<Value = ExportArchive> {
    prop::collection::btree_map(relative_path_strategy(), content_strategy(), 0..max_entries).prop_map(
        |files| {
            files
                .into_iter()
                .map(|(path, content)| ArchiveEntry::new(format!("unpackaged/{}", path), content))
                .collect()
        },
    )
}

/// Whether a generated local file matches its remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEdit {
    /// Same bytes as the remote entry.
    Unchanged,
    /// Different bytes.
    Edited(Vec<u8>),
}

/// Strategy for a local counterpart of a remote file.
pub fn local_edit_strategy() -> impl Strategy<Value = LocalEdit> {
    prop_oneof![
        Just(LocalEdit::Unchanged),
        content_strategy().prop_map(LocalEdit::Edited),
    ]
}

/// Strategy for an archive paired with one local edit per entry.
pub fn sync_case_strategy(max_entries: usize) -> impl Strategy<Value = (ExportArchive, Vec<LocalEdit>)> {
    archive_strategy(max_entries).prop_flat_map(|archive| {
        let len = archive.len();
        (Just(archive), prop::collection::vec(local_edit_strategy(), len))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_archives_encode(archive in archive_strategy(8)) {
            let decoded = ExportArchive::decode(&archive.encode().unwrap()).unwrap();
            prop_assert_eq!(decoded.paths(), archive.paths());
        }

        #[test]
        fn sync_case_has_one_edit_per_entry((archive, edits) in sync_case_strategy(6)) {
            prop_assert_eq!(archive.len(), edits.len());
        }
    }
}
