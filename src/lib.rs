//! attachkeep - content-addressed image attachments for markdown notes and journals.
//!
//! - Scans documents for embedded-image references
//! - Deletes attachments nothing references any more
//! - Folds content-identical attachments into one canonical file and
//!   rewrites the references that pointed at the copies
//! - Stores new images under a digest-derived name so a repeated paste
//!   reuses the existing file

use std::path::{Path, PathBuf};

use globset::GlobSet;

pub mod cleanup;
pub mod config;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod gc;
pub mod insert;
pub mod inventory;
pub mod paths;
pub mod report;
pub mod rewrite;
pub mod scanner;
pub mod store;

pub use cleanup::{Cleanup, CleanupPlan};
pub use config::Config;
pub use error::{Error, Result};
pub use insert::{markup, Inserter};
pub use report::{CleanupReport, CleanupStats, SkippedFile, Stage};
pub use scanner::{Reference, ReferenceScan};
pub use store::{DocumentStore, FsDocumentStore};

/// Which managed tree an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tree {
    Notes,
    Journal,
}

/// Entry point used by the command layer and the editor.
pub struct AttachmentStore {
    config: Config,
    documents: FsDocumentStore,
    exclude: GlobSet,
}

impl AttachmentStore {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let documents = FsDocumentStore::from_config(&config)?;
        let exclude = config.exclude_set()?;
        Ok(AttachmentStore {
            config,
            documents,
            exclude,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tree_root(&self, tree: Tree) -> PathBuf {
        match tree {
            Tree::Notes => self.config.notes_dir(),
            Tree::Journal => self.config.journal_dir(),
        }
    }

    /// Full maintenance run: orphan collection, deduplication, reference rewrites.
    pub fn run_cleanup(&self) -> Result<CleanupReport> {
        Cleanup::new(&self.documents, &self.config).run()
    }

    /// What `run_cleanup` would delete, without changing anything.
    pub fn plan_cleanup(&self) -> Result<CleanupPlan> {
        Cleanup::new(&self.documents, &self.config).plan()
    }

    pub fn inserter(&self, tree: Tree) -> Inserter {
        let root = self.tree_root(tree);
        Inserter::new(self.config.images_dir(&root), self.config.digest_prefix_len)
    }

    /// Store image bytes in a tree's attachment directory; returns the filename.
    pub fn insert_attachment(
        &self,
        tree: Tree,
        bytes: &[u8],
        base_name: &str,
    ) -> Result<Option<String>> {
        self.inserter(tree).insert(bytes, base_name)
    }

    /// Embed-ready path from `document` to a stored attachment of `tree`.
    pub fn embed_path(&self, tree: Tree, document: &Path, filename: &str) -> String {
        self.inserter(tree).embed_path(document, filename)
    }

    /// References for listing, leaving out documents matched by `exclude`.
    ///
    /// Cleanup always scans every document; exclusion never exposes an
    /// attachment to deletion.
    pub fn scan_references(&self) -> Result<ReferenceScan> {
        let trees = self.config.trees();
        let mut scan = ReferenceScan::run(
            &self.documents,
            &trees,
            &self.config.attachments_dir_name,
            Stage::Scanning,
        )?;

        if !self.exclude.is_empty() {
            scan.retain_documents(|document| {
                !trees.iter().any(|tree| {
                    document
                        .strip_prefix(tree)
                        .map(|rel| self.exclude.is_match(rel))
                        .unwrap_or(false)
                })
            });
        }
        Ok(scan)
    }
}
