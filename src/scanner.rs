//! Finds embedded-image markers in documents and resolves their targets.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

use crate::error::Result;
use crate::paths::resolve_reference;
use crate::report::{SkippedFile, Stage};
use crate::store::DocumentStore;

/// `![alt](path)`, `![alt](<path with spaces>)`, optionally followed by a `"title"`.
/// A bare path may hold one level of balanced parentheses, as in `img(1).png`.
const IMAGE_MARKER: &str =
    r#"!\[([^\]\n]*)\]\((?:<([^>\n]+)>|((?:[^()\s]|\([^()\s]*\))+))(?:\s+"[^"\n]*")?\)"#;

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(IMAGE_MARKER).expect("image marker regex is valid"))
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub document: PathBuf,
    /// 1-based.
    pub line: usize,
    /// Path exactly as written, without angle brackets.
    pub raw_path: String,
    pub resolved: PathBuf,
}

/// One marker found on a line: the raw path and its byte span within the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    pub raw_path: String,
    pub span: Range<usize>,
    pub bracketed: bool,
}

/// Every image marker on a single line, in order.
pub fn find_markers(line: &str) -> Vec<MarkerMatch> {
    marker_regex()
        .captures_iter(line)
        .filter_map(|caps| {
            if let Some(m) = caps.get(2) {
                Some(MarkerMatch {
                    raw_path: m.as_str().to_string(),
                    span: m.range(),
                    bracketed: true,
                })
            } else {
                caps.get(3).map(|m| MarkerMatch {
                    raw_path: m.as_str().to_string(),
                    span: m.range(),
                    bracketed: false,
                })
            }
        })
        .collect()
}

/// Lines of a document with the terminator stripped from the matchable text.
///
/// Yields `(content, terminator)` so callers can rebuild the text byte for byte.
pub fn split_lines(text: &str) -> impl Iterator<Item = (&str, &str)> {
    text.split_inclusive('\n').map(|chunk| {
        let body = chunk.strip_suffix('\n').unwrap_or(chunk);
        let body = body.strip_suffix('\r').unwrap_or(body);
        (body, &chunk[body.len()..])
    })
}

/// Whether `raw` names something under an attachment directory.
fn is_attachment_path(raw: &str, attachments_dir_name: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == attachments_dir_name)
}

/// Tracked references in one document's text.
pub fn scan_text(document: &Path, text: &str, attachments_dir_name: &str) -> Vec<Reference> {
    let document_dir = document.parent().unwrap_or(Path::new("/"));
    let mut references = Vec::new();

    for (i, (line, _)) in split_lines(text).enumerate() {
        for marker in find_markers(line) {
            if !is_attachment_path(&marker.raw_path, attachments_dir_name) {
                continue;
            }
            references.push(Reference {
                document: document.to_path_buf(),
                line: i + 1,
                resolved: resolve_reference(&marker.raw_path, document_dir),
                raw_path: marker.raw_path,
            });
        }
    }

    references
}

/// A document snapshot taken by a scan.
#[derive(Debug, Clone)]
pub struct ScannedDocument {
    pub path: PathBuf,
    pub text: String,
}

/// Immutable result of scanning the managed trees.
#[derive(Debug, Clone, Default)]
pub struct ReferenceScan {
    documents: Vec<ScannedDocument>,
    attachments_dir_name: String,
    pub skipped: Vec<SkippedFile>,
}

impl ReferenceScan {
    /// Read every document under `trees`. Unreadable documents are skipped.
    ///
    /// Documents that are not valid UTF-8 are scanned through a lossy decode.
    /// One whose attachment paths themselves were mangled by that decode is
    /// skipped, since its targets cannot be named.
    pub fn run(
        store: &dyn DocumentStore,
        trees: &[PathBuf],
        attachments_dir_name: &str,
        stage: Stage,
    ) -> Result<ReferenceScan> {
        let mut documents = Vec::new();
        let mut skipped = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();

        for tree in trees {
            for path in store.list_documents(tree)? {
                // Nested trees would otherwise list a document twice
                if !seen.insert(path.clone()) {
                    continue;
                }
                match store.read_document(&path) {
                    Ok(bytes) => match decode_document(&path, bytes, attachments_dir_name) {
                        Ok(text) => documents.push(ScannedDocument { path, text }),
                        Err(reason) => {
                            warn!(path = %path.display(), reason, "skipping document");
                            skipped.push(SkippedFile::new(path, stage, reason));
                        }
                    },
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable document");
                        skipped.push(SkippedFile::new(path, stage, err));
                    }
                }
            }
        }

        debug!(documents = documents.len(), "scanned documents");
        Ok(ReferenceScan {
            documents,
            attachments_dir_name: attachments_dir_name.to_string(),
            skipped,
        })
    }

    pub fn documents(&self) -> &[ScannedDocument] {
        &self.documents
    }

    /// Keep only the documents for which `keep` returns true.
    pub fn retain_documents(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.documents.retain(|doc| keep(&doc.path));
    }

    /// Lazily walk every tracked reference. Can be called any number of times.
    pub fn references(&self) -> impl Iterator<Item = Reference> + '_ {
        self.documents
            .iter()
            .flat_map(|doc| scan_text(&doc.path, &doc.text, &self.attachments_dir_name))
    }

    /// Resolved paths mentioned by at least one reference.
    pub fn reference_set(&self) -> HashSet<PathBuf> {
        self.references().map(|r| r.resolved).collect()
    }

    pub fn references_to<'a>(&'a self, target: &'a Path) -> impl Iterator<Item = Reference> + 'a {
        self.references().filter(move |r| r.resolved == target)
    }

    /// References whose target is missing on disk.
    pub fn dangling(&self) -> Vec<Reference> {
        self.references().filter(|r| !r.resolved.exists()).collect()
    }
}

fn decode_document(
    path: &Path,
    bytes: Vec<u8>,
    attachments_dir_name: &str,
) -> std::result::Result<String, &'static str> {
    let err = match String::from_utf8(bytes) {
        Ok(text) => return Ok(text),
        Err(err) => err,
    };

    debug!(path = %path.display(), "document is not valid UTF-8, decoding lossily");
    let text = String::from_utf8_lossy(err.as_bytes()).into_owned();
    let mangled = scan_text(path, &text, attachments_dir_name)
        .iter()
        .any(|r| r.raw_path.contains(REPLACEMENT));
    if mangled {
        return Err("attachment path is not valid UTF-8");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_markers_variants() {
        let line = r#"![a](x/.attachments/a.png) text ![b c](<dir/.attachments/b c.png>) ![t](p.png "title")"#;
        let markers = find_markers(line);

        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].raw_path, "x/.attachments/a.png");
        assert!(!markers[0].bracketed);
        assert_eq!(markers[1].raw_path, "dir/.attachments/b c.png");
        assert!(markers[1].bracketed);
        assert_eq!(&line[markers[1].span.clone()], "dir/.attachments/b c.png");
        assert_eq!(markers[2].raw_path, "p.png");
    }

    #[test]
    fn test_find_markers_balanced_parens() {
        let line = "![a](.attachments/img(1).png) and ![b](.attachments/b.png \"t (x)\")";
        let markers = find_markers(line);

        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].raw_path, ".attachments/img(1).png");
        assert_eq!(&line[markers[0].span.clone()], ".attachments/img(1).png");
        assert_eq!(markers[1].raw_path, ".attachments/b.png");
    }

    #[test]
    fn test_plain_links_are_not_markers() {
        assert!(find_markers("[link](.attachments/a.png)").is_empty());
    }

    #[test]
    fn test_scan_text_tracks_only_attachments() {
        let doc = Path::new("/notes/work/plan.md");
        let text = "# Plan\n![x](.attachments/imgs/x.png)\r\n![y](https://example.com/y.png)\n\n![z](../.attachments/z.png) ![w](../.attachmentsish/w.png)";
        let refs = scan_text(doc, text, ".attachments");

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].line, 2);
        assert_eq!(refs[0].raw_path, ".attachments/imgs/x.png");
        assert_eq!(
            refs[0].resolved,
            PathBuf::from("/notes/work/.attachments/imgs/x.png")
        );
        assert_eq!(refs[1].line, 5);
        assert_eq!(refs[1].resolved, PathBuf::from("/notes/.attachments/z.png"));
    }

    #[test]
    fn test_split_lines_preserves_terminators() {
        let text = "a\r\nb\nc";
        let rebuilt: String = split_lines(text).map(|(l, t)| format!("{}{}", l, t)).collect();
        assert_eq!(rebuilt, text);

        let bodies: Vec<_> = split_lines(text).map(|(l, _)| l).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reference_scan_over_tree() {
        use crate::store::FsDocumentStore;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir_all(root.join(".attachments")).unwrap();
        fs::write(root.join(".attachments/a.png"), b"a").unwrap();
        fs::write(root.join("one.md"), "![a](.attachments/a.png)\n![gone](.attachments/gone.png)\n").unwrap();
        fs::write(root.join("two.md"), "text\n\n![again](./.attachments/a.png)\n").unwrap();

        let store = FsDocumentStore::new(vec!["md".to_string()], ".attachments");
        let scan = ReferenceScan::run(&store, &[root.clone(), root.clone()], ".attachments", Stage::Scanning)
            .unwrap();

        assert_eq!(scan.documents().len(), 2);
        assert_eq!(scan.references().count(), 3);
        // Restartable: a second pass sees the same references
        assert_eq!(scan.references().count(), 3);

        let target = root.join(".attachments/a.png");
        let to_a: Vec<_> = scan.references_to(&target).collect();
        assert_eq!(to_a.len(), 2);
        assert_eq!(to_a[1].line, 3);
        assert_eq!(to_a[1].raw_path, "./.attachments/a.png");

        assert_eq!(scan.reference_set().len(), 2);
        let dangling = scan.dangling();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].raw_path, ".attachments/gone.png");
    }

    #[test]
    fn test_non_utf8_document_is_scanned() {
        use crate::store::FsDocumentStore;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("latin1.md"), b"caf\xe9\n![x](.attachments/x.png)\n").unwrap();
        fs::write(root.join("mangled.md"), b"![y](.attachments/caf\xe9.png)\n").unwrap();

        let store = FsDocumentStore::new(vec!["md".to_string()], ".attachments");
        let scan = ReferenceScan::run(&store, &[root.clone()], ".attachments", Stage::Scanning)
            .unwrap();

        let refs: Vec<_> = scan.references().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resolved, root.join(".attachments/x.png"));

        assert_eq!(scan.skipped.len(), 1);
        assert_eq!(scan.skipped[0].path, root.join("mangled.md"));
    }

    #[test]
    fn test_retain_documents() {
        let mut scan = ReferenceScan {
            documents: vec![
                ScannedDocument {
                    path: PathBuf::from("/n/a.md"),
                    text: "![a](.attachments/a.png)".to_string(),
                },
                ScannedDocument {
                    path: PathBuf::from("/n/drafts/b.md"),
                    text: "![b](.attachments/b.png)".to_string(),
                },
            ],
            attachments_dir_name: ".attachments".to_string(),
            skipped: Vec::new(),
        };

        scan.retain_documents(|p| !p.starts_with("/n/drafts"));

        assert_eq!(scan.documents().len(), 1);
        assert_eq!(scan.references().count(), 1);
    }
}
