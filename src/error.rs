use std::path::PathBuf;

use thiserror::Error;

/// Structural failures that abort an operation.
///
/// Per-file problems during a maintenance run are not errors; they end up
/// as [`SkippedFile`](crate::SkippedFile) entries in the run report.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid exclude pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("cannot parse config {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot encode image: {0}")]
    Encode(#[source] image::ImageError),

    /// Another maintenance run holds the lock.
    #[error("cleanup already running (lock held on {})", .0.display())]
    LockHeld(PathBuf),

    #[error("invalid attachment base name: {0:?}")]
    InvalidBaseName(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
