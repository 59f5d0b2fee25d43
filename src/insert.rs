//! Write path for new attachments: hash first, write only if the content is new.

use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, warn};

use crate::digest::digest_bytes;
use crate::error::{Error, Result};
use crate::paths;
use crate::store::write_atomic;

#[derive(Debug, Clone)]
pub struct Inserter {
    images_dir: PathBuf,
    digest_prefix_len: usize,
}

impl Inserter {
    pub fn new(images_dir: impl Into<PathBuf>, digest_prefix_len: usize) -> Self {
        Inserter {
            images_dir: images_dir.into(),
            digest_prefix_len,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Store an image and return its filename, or `None` when there is nothing to store.
    ///
    /// The image is decoded and re-encoded as RGBA PNG before hashing, so the
    /// same picture pasted from differently-encoded sources lands in one file.
    /// An existing file with the computed name is reused when its bytes match,
    /// and replaced when they do not.
    pub fn insert(&self, bytes: &[u8], base_name: &str) -> Result<Option<String>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        validate_base_name(base_name)?;

        let encoded = canonical_png(bytes)?;
        let digest = digest_bytes(&encoded);
        let filename = format!(
            "{}-{}.png",
            base_name,
            digest.hex_prefix(self.digest_prefix_len)
        );
        let path = self.images_dir.join(&filename);

        match fs::read(&path) {
            Ok(existing) if existing == encoded => {
                debug!(path = %path.display(), "attachment already stored");
                return Ok(Some(filename));
            }
            Ok(_) => warn!(path = %path.display(), "stored attachment is damaged, replacing it"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&path, e)),
        }

        fs::create_dir_all(&self.images_dir).map_err(|e| Error::io(&self.images_dir, e))?;
        write_atomic(&path, &encoded).map_err(|e| Error::io(&path, e))?;
        info!(path = %path.display(), size = encoded.len(), "stored new attachment");

        Ok(Some(filename))
    }

    /// Path a document should embed to reach a stored file.
    pub fn embed_path(&self, document: &Path, filename: &str) -> String {
        paths::embed_path(document, &self.images_dir.join(filename))
    }
}

/// Decode any supported format and re-encode it as RGBA8 PNG.
pub fn canonical_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).map_err(Error::Decode)?;
    let rgba = DynamicImage::ImageRgba8(decoded.to_rgba8());

    let mut out = Cursor::new(Vec::new());
    rgba.write_to(&mut out, ImageFormat::Png)
        .map_err(Error::Encode)?;
    Ok(out.into_inner())
}

/// `![alt](path)`, with angle brackets when the path has whitespace.
pub fn markup(alt: &str, path: &str) -> String {
    if path.chars().any(char::is_whitespace) {
        format!("![{}](<{}>)", alt, path)
    } else {
        format!("![{}]({})", alt, path)
    }
}

fn validate_base_name(base_name: &str) -> Result<()> {
    let bad = base_name.is_empty()
        || base_name.contains(['/', '\\'])
        || base_name.contains("..")
        || base_name.chars().any(char::is_control);
    if bad {
        return Err(Error::InvalidBaseName(base_name.to_string()));
    }
    Ok(())
}
