//! Lexical path helpers shared by the scanner, the rewriter and the inserter.
//!
//! Nothing here touches the filesystem: references must resolve the same
//! way whether or not their target still exists.

use std::path::{Component, Path, PathBuf};

/// Collapse `.` and `..` components without consulting the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root; on a relative path it is kept
                match out.components().next_back() {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                    _ => out.push(".."),
                }
            }
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Make `path` absolute (against the current directory) and normalize it.
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    normalize_path(&joined)
}

/// Resolve a raw reference path against the directory of the document holding it.
pub fn resolve_reference(raw: &str, document_dir: &Path) -> PathBuf {
    let raw_path = Path::new(raw);
    if raw_path.is_absolute() {
        normalize_path(raw_path)
    } else {
        normalize_path(&document_dir.join(raw_path))
    }
}

/// Relative path from directory `from` to `to`, both absolute and normalized.
///
/// Returns `None` when the two paths share no root (e.g. different drives),
/// in which case callers fall back to the absolute target.
pub fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();

    if from.first() != to.first() {
        return None;
    }

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    Some(rel)
}

/// Render a path with forward slashes, as markdown expects.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

/// Forward-slash path from a document's directory to an attachment.
pub fn embed_path(document: &Path, attachment: &Path) -> String {
    let document_dir = document.parent().unwrap_or(Path::new("/"));
    match relative_path(&normalize_path(document_dir), &normalize_path(attachment)) {
        Some(rel) => to_slash(&rel),
        None => to_slash(attachment),
    }
}

/// Lowercased extension of a path, empty when there is none.
pub fn extension_lower(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn test_resolve_reference() {
        let dir = Path::new("/notes/work");
        assert_eq!(
            resolve_reference(".attachments/imgs/a.png", dir),
            PathBuf::from("/notes/work/.attachments/imgs/a.png")
        );
        assert_eq!(
            resolve_reference("../.attachments/imgs/a.png", dir),
            PathBuf::from("/notes/.attachments/imgs/a.png")
        );
        assert_eq!(
            resolve_reference("/abs/.attachments/./b.png", dir),
            PathBuf::from("/abs/.attachments/b.png")
        );
    }

    #[test]
    fn test_relative_path() {
        let rel = relative_path(
            Path::new("/notes/work/deep"),
            Path::new("/notes/.attachments/imgs/a.png"),
        );
        assert_eq!(rel, Some(PathBuf::from("../../.attachments/imgs/a.png")));

        let same_dir = relative_path(Path::new("/notes"), Path::new("/notes/a.png"));
        assert_eq!(same_dir, Some(PathBuf::from("a.png")));
    }

    #[test]
    fn test_embed_path_uses_forward_slashes() {
        let doc = Path::new("/notes/projects/plan.md");
        let img = Path::new("/notes/.attachments/imgs/image-abc.png");
        assert_eq!(embed_path(doc, img), "../.attachments/imgs/image-abc.png");
    }

    #[test]
    fn test_extension_lower() {
        assert_eq!(extension_lower(Path::new("a/B.PNG")), "png");
        assert_eq!(extension_lower(Path::new("a/noext")), "");
    }
}
