//! Points references at canonical attachments before duplicates are removed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dedup::DuplicatePair;
use crate::paths::embed_path;
use crate::report::{SkippedFile, Stage};
use crate::scanner::{find_markers, split_lines, Reference, ReferenceScan};
use crate::store::DocumentStore;

#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub references_updated: usize,
    pub rewritten_documents: Vec<PathBuf>,
    /// Duplicates whose every referencing document was rewritten.
    pub deletable: Vec<DuplicatePair>,
    /// Duplicates kept because at least one referencing document failed.
    pub retained: Vec<DuplicatePair>,
    pub skipped: Vec<SkippedFile>,
}

/// Rewrite every reference to a planned duplicate so it names the canonical file.
///
/// Each affected document is re-read, edited once for all its duplicates and
/// written back once. Only the path token of a matching marker changes.
pub fn rewrite_references(
    store: &dyn DocumentStore,
    scan: &ReferenceScan,
    pairs: &[DuplicatePair],
) -> RewriteOutcome {
    let canonical_of: HashMap<&Path, &Path> = pairs
        .iter()
        .map(|p| (p.duplicate.as_path(), p.canonical.as_path()))
        .collect();

    let mut by_document: BTreeMap<PathBuf, Vec<Reference>> = BTreeMap::new();
    for reference in scan.references() {
        if canonical_of.contains_key(reference.resolved.as_path()) {
            by_document
                .entry(reference.document.clone())
                .or_default()
                .push(reference);
        }
    }

    let mut outcome = RewriteOutcome::default();
    let mut blocked: HashSet<PathBuf> = HashSet::new();

    for (document, references) in &by_document {
        match rewrite_document(store, document, references, &canonical_of) {
            Ok(count) => {
                debug!(document = %document.display(), references = count, "rewrote document");
                outcome.references_updated += count;
                outcome.rewritten_documents.push(document.clone());
            }
            Err(reason) => {
                warn!(document = %document.display(), reason = %reason, "abandoned rewrite");
                outcome
                    .skipped
                    .push(SkippedFile::new(document, Stage::Rewriting, reason));
                blocked.extend(references.iter().map(|r| r.resolved.clone()));
            }
        }
    }

    for pair in pairs {
        if blocked.contains(&pair.duplicate) {
            outcome.retained.push(pair.clone());
        } else {
            outcome.deletable.push(pair.clone());
        }
    }

    outcome
}

/// Apply the substitutions for one document; returns how many tokens changed.
fn rewrite_document(
    store: &dyn DocumentStore,
    document: &Path,
    references: &[Reference],
    canonical_of: &HashMap<&Path, &Path>,
) -> Result<usize, String> {
    let bytes = store
        .read_document(document)
        .map_err(|e| format!("read failed: {}", e))?;
    // Rewriting a lossy decode would corrupt the bytes around the edits
    let text = String::from_utf8(bytes)
        .map_err(|_| "not valid UTF-8, left unchanged".to_string())?;

    // line -> raw path -> (replacement, occurrences expected)
    let mut edits: HashMap<usize, HashMap<&str, (String, usize)>> = HashMap::new();
    for reference in references {
        let canonical = canonical_of[reference.resolved.as_path()];
        let entry = edits
            .entry(reference.line)
            .or_default()
            .entry(reference.raw_path.as_str())
            .or_insert_with(|| (embed_path(document, canonical), 0));
        entry.1 += 1;
    }

    let mut updated = String::with_capacity(text.len());
    let mut replaced = 0;

    for (i, (line, terminator)) in split_lines(&text).enumerate() {
        let Some(line_edits) = edits.get(&(i + 1)) else {
            updated.push_str(line);
            updated.push_str(terminator);
            continue;
        };

        let (new_line, counts) = rewrite_line(line, line_edits);
        for (raw, (_, expected)) in line_edits {
            if counts.get(raw).copied().unwrap_or(0) != *expected {
                return Err(format!(
                    "line {} no longer holds {:?}; document changed since scan",
                    i + 1,
                    raw
                ));
            }
            replaced += expected;
        }
        updated.push_str(&new_line);
        updated.push_str(terminator);
    }

    if replaced != references.len() {
        return Err("document changed since scan".to_string());
    }

    store
        .write_document(document, &updated)
        .map_err(|e| format!("write failed: {}", e))?;
    Ok(replaced)
}

/// Substitute the path token of each matching marker, leaving the rest of the line as is.
fn rewrite_line<'a>(
    line: &str,
    edits: &HashMap<&'a str, (String, usize)>,
) -> (String, HashMap<&'a str, usize>) {
    let mut out = String::with_capacity(line.len());
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut cursor = 0;

    for marker in find_markers(line) {
        let Some((&raw, (replacement, _))) = edits.get_key_value(marker.raw_path.as_str()) else {
            continue;
        };

        out.push_str(&line[cursor..marker.span.start]);
        if !marker.bracketed && replacement.chars().any(char::is_whitespace) {
            out.push('<');
            out.push_str(replacement);
            out.push('>');
        } else {
            out.push_str(replacement);
        }
        cursor = marker.span.end;
        *counts.entry(raw).or_insert(0) += 1;
    }

    out.push_str(&line[cursor..]);
    (out, counts)
}
