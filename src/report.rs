use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Stage of a maintenance run, in execution order.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scanning,
    Collecting,
    Rescanning,
    Deduplicating,
    Rewriting,
    Deleting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Scanning => "scanning",
            Stage::Collecting => "collecting",
            Stage::Rescanning => "rescanning",
            Stage::Deduplicating => "deduplicating",
            Stage::Rewriting => "rewriting",
            Stage::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// A file that a stage could not process and skipped.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

impl SkippedFile {
    pub fn new(path: impl Into<PathBuf>, stage: Stage, reason: impl fmt::Display) -> Self {
        SkippedFile {
            path: path.into(),
            stage,
            reason: reason.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub bytes_freed: u64,
    pub unused_deleted: usize,
    pub duplicates_deleted: usize,
    pub references_updated: usize,
}

impl CleanupStats {
    pub fn is_empty(&self) -> bool {
        *self == CleanupStats::default()
    }
}

/// Result of a maintenance run. Always produced, even when files were skipped.
#[derive(Serialize, Debug, Clone, Default)]
pub struct CleanupReport {
    pub stats: CleanupStats,
    pub skipped: Vec<SkippedFile>,
}
