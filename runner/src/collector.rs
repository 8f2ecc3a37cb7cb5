use crate::model::{distinct_colors, ModelEntry};
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Model root {0:?} is not a directory")]
    InvalidRoot(PathBuf),
    #[error("No model results found in {0:?}")]
    NoModels(PathBuf),
}

/// Finds model results below a model root
///
/// Every immediate subdirectory of the root is a model, named after the directory.
#[derive(Debug, Clone)]
pub struct ModelCollector {
    root: PathBuf,
    // only directories listed here become models, everything is accepted if empty
    allowed: Vec<String>,
    // substring which must be part of a data file name
    filter: String,
    extension: String,
}

impl ModelCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowed: Vec::new(),
            filter: String::new(),
            extension: "nc".to_owned(),
        }
    }

    pub fn allowed(mut self, models: Vec<String>) -> Self {
        self.allowed = models;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Discover all models, sorted by their uppercased name and colored from a shared palette
    ///
    /// The result only depends on the directory contents, so every worker running this on the
    /// same root ends up with the same list.
    pub fn collect(&self) -> Result<Vec<ModelEntry>, DiscoveryError> {
        if !self.root.is_dir() {
            return Err(DiscoveryError::InvalidRoot(self.root.clone()));
        }

        info!(root = ?self.root, "Searching for model results");

        let directories = walker(&self.root)
            .max_depth(Some(1))
            .build()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Failed to search for models: {e}");
                    None
                }
            })
            .filter(|entry| entry.depth() == 1 && is_dir(entry))
            .map(DirEntry::into_path)
            .filter(|path| {
                self.allowed.is_empty()
                    || path.file_name().map_or(false, |name| {
                        self.allowed.iter().any(|allowed| name == allowed.as_str())
                    })
            })
            .collect_vec();

        let mut models = directories
            .into_par_iter()
            .map(|path| {
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let files = self.model_files(&path);

                debug!(model = %name, files = files.len(), "Found model");

                (name, path, files)
            })
            .collect::<Vec<_>>();

        if models.is_empty() {
            return Err(DiscoveryError::NoModels(self.root.clone()));
        }

        models.sort_by_key(|(name, _, _)| name.to_uppercase());
        let colors = distinct_colors(models.len());

        let entries = models
            .into_iter()
            .zip(colors)
            .map(|((name, path, files), color)| ModelEntry {
                name,
                path,
                color,
                files,
            })
            .collect_vec();

        Ok(entries)
    }

    fn model_files(&self, path: &Path) -> Vec<PathBuf> {
        walker(path)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().map_or(false, |kind| kind.is_file()))
            .map(DirEntry::into_path)
            .filter(|file| {
                file.extension()
                    .map_or(false, |extension| extension == self.extension.as_str())
            })
            .filter(|file| {
                file.file_name()
                    .map_or(false, |name| name.to_string_lossy().contains(&self.filter))
            })
            .sorted()
            .collect_vec()
    }
}

/// Walk below `path`, following symlinks and skipping hidden entries
///
/// No ignore file of any kind applies, model results are often kept inside repositories.
fn walker(path: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(path);
    builder
        .follow_links(true)
        .hidden(true)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false);

    builder
}

// entries reached through a followed symlink report the type of their target
fn is_dir(entry: &DirEntry) -> bool {
    entry.file_type().map_or(false, |kind| kind.is_dir())
}

#[cfg(test)]
mod collector_test;
