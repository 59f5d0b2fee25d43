//! Enumerates attachment files under the managed trees.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::paths::extension_lower;
use crate::report::{SkippedFile, Stage};

/// Attachments found by one walk, plus entries the walk could not read.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Sorted and de-duplicated.
    ///
    /// The order matters: deduplication keeps the first file of each digest group,
    /// so sorting by full path makes canonical selection reproducible everywhere.
    pub files: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
}

/// Walk the trees for attachment files. Unreadable entries below a tree root
/// are recorded under `stage` and left out, so they are never deleted.
pub fn list_attachments(
    trees: &[PathBuf],
    attachments_dir_name: &str,
    image_extensions: &[String],
    stage: Stage,
) -> Result<Inventory> {
    let mut attachments = Vec::new();
    let mut skipped = Vec::new();

    for tree in trees {
        if !tree.exists() {
            debug!(tree = %tree.display(), "tree does not exist, nothing to inventory");
            continue;
        }

        for entry in WalkDir::new(tree).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(Error::Walk {
                        root: tree.clone(),
                        source: err,
                    })
                }
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    let path = err.path().unwrap_or(tree).to_path_buf();
                    skipped.push(SkippedFile::new(path, stage, &err));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if in_attachment_dir(tree, path, attachments_dir_name)
                && image_extensions.contains(&extension_lower(path))
            {
                attachments.push(entry.into_path());
            }
        }
    }

    attachments.sort();
    attachments.dedup();
    Ok(Inventory {
        files: attachments,
        skipped,
    })
}

/// Whether some directory between `tree` and the file is an attachment directory.
fn in_attachment_dir(tree: &Path, path: &Path, attachments_dir_name: &str) -> bool {
    let rel = path.strip_prefix(tree).unwrap_or(path);
    rel.parent()
        .map(|dir| {
            dir.components()
                .any(|c| c.as_os_str().to_str() == Some(attachments_dir_name))
        })
        .unwrap_or(false)
}
