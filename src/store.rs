//! Boundary with the document store: list, read and write plain text documents.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::paths::extension_lower;

pub trait DocumentStore {
    /// Every document under `root`, in a stable order. A missing root is empty.
    fn list_documents(&self, root: &Path) -> Result<Vec<PathBuf>>;

    /// Raw document bytes. Decoding is up to the caller.
    fn read_document(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn write_document(&self, path: &Path, text: &str) -> io::Result<()>;
}

/// Documents are plain files on disk, filtered by extension.
///
/// Every document is listed. Exclude patterns only narrow what gets reported,
/// since an excluded document still keeps its attachments alive.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    document_extensions: Vec<String>,
    attachments_dir_name: String,
}

impl FsDocumentStore {
    pub fn new(document_extensions: Vec<String>, attachments_dir_name: impl Into<String>) -> Self {
        FsDocumentStore {
            document_extensions,
            attachments_dir_name: attachments_dir_name.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(FsDocumentStore::new(
            config.document_extension_set(),
            config.attachments_dir_name.clone(),
        ))
    }

    fn is_document(&self, path: &Path) -> bool {
        let ext = extension_lower(path);
        self.document_extensions.iter().any(|e| *e == ext)
    }
}

impl DocumentStore for FsDocumentStore {
    fn list_documents(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut documents = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            // Never descend into attachment storage
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name().to_str() == Some(self.attachments_dir_name.as_str()))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => {
                    return Err(Error::Walk {
                        root: root.to_path_buf(),
                        source: err,
                    })
                }
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_document(entry.path()) {
                continue;
            }

            documents.push(entry.into_path());
        }

        Ok(documents)
    }

    fn read_document(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_document(&self, path: &Path, text: &str) -> io::Result<()> {
        write_atomic(path, text.as_bytes())
    }
}

/// Replace `path` with `bytes` through a temp file renamed into place.
///
/// Readers see either the old content or the new, never a partial write.
/// An existing file keeps its permissions.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
