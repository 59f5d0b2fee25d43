//! Groups attachments by content digest and plans which copies to drop.

use std::path::PathBuf;

use ahash::AHashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::digest::{digest_file, ContentDigest};
use crate::report::{SkippedFile, Stage};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DuplicatePair {
    pub duplicate: PathBuf,
    pub canonical: PathBuf,
}

/// Attachments sharing one digest; the first member is canonical.
#[derive(Debug, Clone)]
pub struct DigestGroup {
    pub digest: ContentDigest,
    pub members: Vec<PathBuf>,
}

impl DigestGroup {
    pub fn canonical(&self) -> &PathBuf {
        &self.members[0]
    }

    pub fn duplicates(&self) -> &[PathBuf] {
        &self.members[1..]
    }
}

/// The deduplication plan. Nothing is deleted or rewritten to build it.
#[derive(Debug, Clone, Default)]
pub struct DedupPlan {
    pub groups: Vec<DigestGroup>,
    pub skipped: Vec<SkippedFile>,
}

impl DedupPlan {
    /// Every (duplicate, canonical) pair, in inventory order.
    pub fn pairs(&self) -> Vec<DuplicatePair> {
        let mut pairs: Vec<DuplicatePair> = self
            .groups
            .iter()
            .flat_map(|group| {
                group.duplicates().iter().map(move |dup| DuplicatePair {
                    duplicate: dup.clone(),
                    canonical: group.canonical().clone(),
                })
            })
            .collect();
        pairs.sort_by(|a, b| a.duplicate.cmp(&b.duplicate));
        pairs
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Hash every attachment and keep groups with more than one member.
///
/// `inventory` must already be in canonical order (see `list_attachments`).
/// Files that cannot be read are skipped and take no part in any group.
pub fn plan_dedup(inventory: &[PathBuf]) -> DedupPlan {
    let mut index: AHashMap<ContentDigest, usize> = AHashMap::new();
    let mut groups: Vec<DigestGroup> = Vec::new();
    let mut skipped = Vec::new();

    for path in inventory {
        let digest = match digest_file(path) {
            Ok(digest) => digest,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable attachment");
                skipped.push(SkippedFile::new(path, Stage::Deduplicating, err));
                continue;
            }
        };

        match index.get(&digest) {
            Some(&i) => {
                debug!(path = %path.display(), canonical = %groups[i].canonical().display(), "duplicate content");
                groups[i].members.push(path.clone());
            }
            None => {
                index.insert(digest, groups.len());
                groups.push(DigestGroup {
                    digest,
                    members: vec![path.clone()],
                });
            }
        }
    }

    groups.retain(|g| g.members.len() > 1);
    DedupPlan { groups, skipped }
}
