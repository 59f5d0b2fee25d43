//! SHA-256 content digests for files and in-memory blobs.

use std::fmt;
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `len` hex characters, as embedded in attachment filenames.
    pub fn hex_prefix(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.hex_prefix(16))
    }
}

pub fn digest_bytes(bytes: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ContentDigest(hasher.finalize().into())
}

/// Digest of a whole file. Reads it fully into memory.
pub fn digest_file(path: &Path) -> std::io::Result<ContentDigest> {
    let bytes = fs::read(path)?;
    Ok(digest_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_known_value() {
        let digest = digest_bytes(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest.hex_prefix(12), "ba7816bf8f01");
    }

    #[test]
    fn test_digest_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, b"same content").unwrap();

        assert_eq!(digest_file(&path).unwrap(), digest_bytes(b"same content"));
        assert_ne!(digest_file(&path).unwrap(), digest_bytes(b"other content"));
    }

    #[test]
    fn test_digest_missing_file() {
        assert!(digest_file(Path::new("/no/such/blob.png")).is_err());
    }
}
