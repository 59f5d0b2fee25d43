//! Mark-and-sweep over attachments: anything no reference resolves to goes.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::report::{SkippedFile, Stage};

/// Inventory minus the reference set, in inventory order.
pub fn find_orphans(inventory: &[PathBuf], referenced: &HashSet<PathBuf>) -> Vec<PathBuf> {
    inventory
        .iter()
        .filter(|path| !referenced.contains(*path))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct Removal {
    pub deleted: Vec<PathBuf>,
    pub bytes_freed: u64,
    pub skipped: Vec<SkippedFile>,
}

/// Delete each file, counting its size only when the deletion succeeds.
///
/// A failed stat just leaves that file out of the byte total; a failed
/// delete is recorded and the sweep carries on.
pub fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>, stage: Stage) -> Removal {
    let mut removal = Removal::default();

    for path in paths {
        let size = fs::metadata(path).ok().map(|m| m.len());

        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), size = ?size, "deleted attachment");
                removal.bytes_freed += size.unwrap_or(0);
                removal.deleted.push(path.to_path_buf());
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to delete attachment");
                removal.skipped.push(SkippedFile::new(path, stage, err));
            }
        }
    }

    removal
}

/// Delete every orphan.
pub fn collect_garbage(inventory: &[PathBuf], referenced: &HashSet<PathBuf>) -> Removal {
    let orphans = find_orphans(inventory, referenced);
    remove_files(orphans.iter().map(PathBuf::as_path), Stage::Collecting)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_orphans() {
        let inventory: Vec<PathBuf> = ["/a.png", "/b.png", "/c.png"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let referenced: HashSet<PathBuf> = [PathBuf::from("/b.png")].into_iter().collect();

        assert_eq!(
            find_orphans(&inventory, &referenced),
            vec![PathBuf::from("/a.png"), PathBuf::from("/c.png")]
        );
    }

    #[test]
    fn test_collect_garbage_counts_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.png");
        let orphan = dir.path().join("orphan.png");
        fs::write(&keep, b"keep").unwrap();
        fs::write(&orphan, b"0123456789").unwrap();

        let inventory = vec![keep.clone(), orphan.clone()];
        let referenced: HashSet<PathBuf> = [keep.clone()].into_iter().collect();

        let removal = collect_garbage(&inventory, &referenced);
        assert_eq!(removal.deleted, vec![orphan.clone()]);
        assert_eq!(removal.bytes_freed, 10);
        assert!(removal.skipped.is_empty());
        assert!(keep.exists());
        assert!(!orphan.exists());

        // Second pass over the same inventory finds nothing left to delete
        let again = collect_garbage(&[keep.clone()], &referenced);
        assert!(again.deleted.is_empty());
    }

    #[test]
    fn test_failed_delete_is_skipped_not_counted() {
        let missing = PathBuf::from("/no/such/dir/orphan.png");
        let removal = remove_files([missing.as_path()], Stage::Collecting);

        assert!(removal.deleted.is_empty());
        assert_eq!(removal.bytes_freed, 0);
        assert_eq!(removal.skipped.len(), 1);
        assert_eq!(removal.skipped[0].stage, Stage::Collecting);
    }
}
