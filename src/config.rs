//! Layered configuration: defaults, then a config file, then environment,
//! then whatever the command line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths::absolutize;

pub const ENV_DATA_DIR: &str = "ATTACHKEEP_DATA_DIR";
pub const ENV_NOTES_DIR: &str = "ATTACHKEEP_NOTES_DIR";
pub const ENV_JOURNAL_DIR: &str = "ATTACHKEEP_JOURNAL_DIR";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/notes` when unset.
    pub notes_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/journal` when unset.
    pub journal_dir: Option<PathBuf>,
    pub attachments_dir_name: String,
    pub images_subdir: String,
    pub image_extensions: Vec<String>,
    pub document_extensions: Vec<String>,
    /// Glob patterns (relative to a tree root) for documents left out of
    /// reference listings. Their attachments are still kept by cleanup.
    pub exclude: Vec<String>,
    pub digest_prefix_len: usize,
    pub lock_file_name: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".attachkeep");

        Config {
            data_dir,
            notes_dir: None,
            journal_dir: None,
            attachments_dir_name: ".attachments".to_string(),
            images_subdir: "imgs".to_string(),
            image_extensions: ["png", "jpg", "jpeg", "gif", "bmp", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            document_extensions: vec!["md".to_string()],
            exclude: Vec::new(),
            digest_prefix_len: 12,
            lock_file_name: "cleanup.lock".to_string(),
        }
    }
}

impl Config {
    /// Load from an optional config file, then apply environment overrides.
    ///
    /// `required` says whether a missing file is an error (an explicitly named
    /// file) or just means "use the defaults" (the default location).
    pub fn load(file: Option<&Path>, required: bool) -> Result<Config> {
        let mut config = match file {
            Some(path) if path.exists() => Config::from_file(path)?,
            Some(path) if required => {
                return Err(Error::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                ))
            }
            _ => Config::default(),
        };

        config.apply_env(|key| std::env::var_os(key).map(PathBuf::from));
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file; the format follows its extension.
    pub fn from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let parse_err = |message: String| Error::ConfigParse {
            path: path.to_path_buf(),
            message,
        };

        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_err(e.to_string())),
            Some("yml") | Some("yaml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))
            }
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string())),
            other => Err(parse_err(format!(
                "unsupported config format: {}",
                other.unwrap_or("<none>")
            ))),
        }
    }

    /// Environment overrides; `lookup` is injectable so tests don't touch the process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<PathBuf>) {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = dir;
        }
        if let Some(dir) = lookup(ENV_NOTES_DIR) {
            self.notes_dir = Some(dir);
        }
        if let Some(dir) = lookup(ENV_JOURNAL_DIR) {
            self.journal_dir = Some(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(8..=64).contains(&self.digest_prefix_len) {
            return Err(Error::InvalidConfig(format!(
                "digest_prefix_len must be between 8 and 64, got {}",
                self.digest_prefix_len
            )));
        }
        let name = self.attachments_dir_name.as_str();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(Error::InvalidConfig(format!(
                "attachments_dir_name must be a single path segment, got {:?}",
                name
            )));
        }
        if self.image_extensions.is_empty() {
            return Err(Error::InvalidConfig(
                "image_extensions must not be empty".to_string(),
            ));
        }
        if self.document_extensions.is_empty() {
            return Err(Error::InvalidConfig(
                "document_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn notes_dir(&self) -> PathBuf {
        absolutize(
            &self
                .notes_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("notes")),
        )
    }

    pub fn journal_dir(&self) -> PathBuf {
        absolutize(
            &self
                .journal_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("journal")),
        )
    }

    /// Managed tree roots in fixed order: notes, then journal.
    pub fn trees(&self) -> Vec<PathBuf> {
        let mut trees = vec![self.notes_dir(), self.journal_dir()];
        trees.dedup();
        trees
    }

    /// Centralized directory for newly inserted attachments of a tree.
    pub fn images_dir(&self, tree: &Path) -> PathBuf {
        tree.join(&self.attachments_dir_name).join(&self.images_subdir)
    }

    pub fn lock_path(&self) -> PathBuf {
        absolutize(&self.data_dir).join(&self.lock_file_name)
    }

    /// Normalized (lowercase, no leading dot) image extension allow-list.
    pub fn image_extension_set(&self) -> Vec<String> {
        normalize_extensions(&self.image_extensions)
    }

    pub fn document_extension_set(&self) -> Vec<String> {
        normalize_extensions(&self.document_extensions)
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.exclude {
            builder.add(Glob::new(pattern)?);
        }
        Ok(builder.build()?)
    }
}

fn normalize_extensions(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
