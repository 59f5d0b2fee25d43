#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use attachkeep::{Config, DocumentStore, FsDocumentStore};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

/// A throwaway data dir with notes and journal trees.
pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            notes_dir: Some(dir.path().join("notes")),
            journal_dir: Some(dir.path().join("journal")),
            ..Config::default()
        };
        fs::create_dir_all(config.notes_dir()).unwrap();
        fs::create_dir_all(config.journal_dir()).unwrap();
        Workspace { dir, config }
    }

    pub fn notes(&self) -> PathBuf {
        self.config.notes_dir()
    }

    pub fn journal(&self) -> PathBuf {
        self.config.journal_dir()
    }

    pub fn write(&self, path: &Path, bytes: &[u8]) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, bytes).unwrap();
        path.to_path_buf()
    }

    pub fn fs_store(&self) -> FsDocumentStore {
        FsDocumentStore::from_config(&self.config).unwrap()
    }
}

pub fn png_bytes(seed: u8) -> Vec<u8> {
    encode(seed, ImageFormat::Png)
}

pub fn encode(seed: u8, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_fn(4, 4, |x, y| Rgb([x as u8 * 40, y as u8 * 40, seed]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// Filesystem store that fails reads or writes for chosen documents.
pub struct FlakyStore {
    pub inner: FsDocumentStore,
    pub fail_reads: RefCell<HashSet<PathBuf>>,
    pub fail_writes: RefCell<HashSet<PathBuf>>,
}

impl FlakyStore {
    pub fn new(inner: FsDocumentStore) -> Self {
        FlakyStore {
            inner,
            fail_reads: RefCell::new(HashSet::new()),
            fail_writes: RefCell::new(HashSet::new()),
        }
    }
}

impl DocumentStore for FlakyStore {
    fn list_documents(&self, root: &Path) -> attachkeep::Result<Vec<PathBuf>> {
        self.inner.list_documents(root)
    }

    fn read_document(&self, path: &Path) -> io::Result<Vec<u8>> {
        if self.fail_reads.borrow().contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read refused"));
        }
        self.inner.read_document(path)
    }

    fn write_document(&self, path: &Path, text: &str) -> io::Result<()> {
        if self.fail_writes.borrow().contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "write refused"));
        }
        self.inner.write_document(path, text)
    }
}
