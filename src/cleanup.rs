//! One maintenance run: collect orphans, then fold duplicates into canonical files.
//!
//! Stages run strictly in order:
//! scanning -> collecting -> rescanning -> deduplicating -> rewriting -> deleting.
//! Rewriting for a duplicate always finishes before that duplicate is deleted,
//! so a run killed midway leaves no reference pointing at a missing file.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::dedup::{plan_dedup, DuplicatePair};
use crate::error::{Error, Result};
use crate::gc::{collect_garbage, find_orphans, remove_files};
use crate::inventory::{list_attachments, Inventory};
use crate::report::{CleanupReport, SkippedFile, Stage};
use crate::rewrite::rewrite_references;
use crate::scanner::ReferenceScan;
use crate::store::DocumentStore;

/// What a run would do, computed without touching anything.
#[derive(Serialize, Debug, Clone, Default)]
pub struct CleanupPlan {
    pub orphans: Vec<PathBuf>,
    pub duplicates: Vec<DuplicatePair>,
    pub skipped: Vec<SkippedFile>,
}

pub struct Cleanup<'a> {
    store: &'a dyn DocumentStore,
    trees: Vec<PathBuf>,
    attachments_dir_name: String,
    image_extensions: Vec<String>,
    lock_path: Option<PathBuf>,
}

impl<'a> Cleanup<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: &Config) -> Self {
        Cleanup {
            store,
            trees: config.trees(),
            attachments_dir_name: config.attachments_dir_name.clone(),
            image_extensions: config.image_extension_set(),
            lock_path: Some(config.lock_path()),
        }
    }

    /// Run without taking the advisory lock file.
    pub fn without_lock(mut self) -> Self {
        self.lock_path = None;
        self
    }

    fn scan(&self, stage: Stage) -> Result<ReferenceScan> {
        ReferenceScan::run(self.store, &self.trees, &self.attachments_dir_name, stage)
    }

    fn inventory(&self, stage: Stage) -> Result<Inventory> {
        list_attachments(
            &self.trees,
            &self.attachments_dir_name,
            &self.image_extensions,
            stage,
        )
    }

    /// Execute a full maintenance run.
    ///
    /// If any document could not be read, its references are unknown, so
    /// nothing is deleted or rewritten; the report lists what was skipped.
    pub fn run(&self) -> Result<CleanupReport> {
        let _lock = match &self.lock_path {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };

        let mut report = CleanupReport::default();

        // Scanning
        let inventory = self.inventory(Stage::Scanning)?;
        report.skipped.extend(inventory.skipped);
        let scan = self.scan(Stage::Scanning)?;
        let complete = scan.skipped.is_empty();
        report.skipped.extend(scan.skipped.iter().cloned());

        if !complete {
            warn!(
                unreadable = scan.skipped.len(),
                "some documents could not be read; leaving attachments untouched"
            );
            return Ok(report);
        }

        // Collecting
        let removal = collect_garbage(&inventory.files, &scan.reference_set());
        report.stats.unused_deleted = removal.deleted.len();
        report.stats.bytes_freed += removal.bytes_freed;
        report.skipped.extend(removal.skipped);
        info!(
            deleted = report.stats.unused_deleted,
            bytes = removal.bytes_freed,
            "collected unreferenced attachments"
        );

        // Rescanning
        let remaining = self.inventory(Stage::Rescanning)?;
        report.skipped.extend(remaining.skipped);

        // Deduplicating
        let plan = plan_dedup(&remaining.files);
        report.skipped.extend(plan.skipped.iter().cloned());
        let pairs = plan.pairs();
        if pairs.is_empty() {
            info!("no duplicate attachments");
            return Ok(report);
        }

        // Rewriting, against a fresh view of the documents
        let scan = self.scan(Stage::Rewriting)?;
        if !scan.skipped.is_empty() {
            report.skipped.extend(scan.skipped.iter().cloned());
            warn!("some documents could not be re-read; keeping all duplicates");
            return Ok(report);
        }
        let rewrite = rewrite_references(self.store, &scan, &pairs);
        report.stats.references_updated = rewrite.references_updated;
        report.skipped.extend(rewrite.skipped);
        for pair in &rewrite.retained {
            report.skipped.push(SkippedFile::new(
                &pair.duplicate,
                Stage::Rewriting,
                "kept: a referencing document could not be updated",
            ));
        }

        // Deleting
        let removal = remove_files(
            rewrite.deletable.iter().map(|p| p.duplicate.as_path()),
            Stage::Deleting,
        );
        report.stats.duplicates_deleted = removal.deleted.len();
        report.stats.bytes_freed += removal.bytes_freed;
        report.skipped.extend(removal.skipped);
        info!(
            deleted = report.stats.duplicates_deleted,
            references = report.stats.references_updated,
            "removed duplicate attachments"
        );

        Ok(report)
    }

    /// Dry run: orphans and duplicate pairs as a run would see them.
    pub fn plan(&self) -> Result<CleanupPlan> {
        let inventory = self.inventory(Stage::Scanning)?;
        let scan = self.scan(Stage::Scanning)?;

        let orphans = find_orphans(&inventory.files, &scan.reference_set());
        let doomed: HashSet<&PathBuf> = orphans.iter().collect();
        let survivors: Vec<PathBuf> = inventory
            .files
            .iter()
            .filter(|p| !doomed.contains(p))
            .cloned()
            .collect();
        let dedup = plan_dedup(&survivors);

        let mut skipped = inventory.skipped;
        skipped.extend(scan.skipped.iter().cloned());
        skipped.extend(dedup.skipped.iter().cloned());

        Ok(CleanupPlan {
            orphans,
            duplicates: dedup.pairs(),
            skipped,
        })
    }
}

/// Exclusive OS lock on the lock file, held for the duration of a run.
///
/// The lock goes away with the file handle, so a killed run never blocks
/// the next one. The file itself is left in place.
#[derive(Debug)]
pub struct RunLock {
    _file: File,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<RunLock> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(RunLock { _file: file }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(Error::LockHeld(path.to_path_buf()))
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }
}
