//! Recursive discovery of image files under a library root.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

use crate::config::ScannerConfig;

/// Invoked after each matched file: (count so far, containing directory, file name).
pub type ScanProgress<'a> = dyn FnMut(usize, &Path, &str) + 'a;
/// Invoked for each directory that could not be enumerated.
pub type ScanError<'a> = dyn FnMut(&Path, &str) + 'a;

pub struct Scanner {
    extensions: Vec<String>,
    skip_hidden: bool,
    follow_symlinks: bool,
    cancel: Arc<AtomicBool>,
}

impl Scanner {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            extensions: config
                .image_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            skip_hidden: config.skip_hidden,
            follow_symlinks: config.follow_symlinks,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked at every directory-entry boundary; settable from any thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Share a cancellation flag owned by the caller.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Walk `root` depth-first and collect absolute paths of image files.
    ///
    /// Enumeration errors are reported through `on_error` and do not stop the
    /// walk. Cancellation returns the partial result accumulated so far.
    pub fn scan(
        &self,
        root: &Path,
        mut progress: Option<&mut ScanProgress>,
        mut on_error: Option<&mut ScanError>,
    ) -> Vec<PathBuf> {
        let mut results = Vec::new();

        if !root.is_dir() {
            if let Some(cb) = on_error.as_mut() {
                cb(root, "path does not exist or is not a directory");
            }
            return results;
        }

        // Walk from an absolute root so every yielded path is absolute.
        let root = match std::path::absolute(root) {
            Ok(abs) => abs,
            Err(_) => root.to_path_buf(),
        };

        // Visited set for symlink loop detection, seeded with the root.
        let mut visited: HashSet<PathBuf> = HashSet::new();
        if self.follow_symlinks {
            if let Ok(canonical) = root.canonicalize() {
                visited.insert(canonical);
            }
        }

        let skip_hidden = self.skip_hidden;
        let follow_symlinks = self.follow_symlinks;
        let walker = WalkDir::new(&root)
            .follow_links(follow_symlinks)
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                if skip_hidden && is_hidden(entry) {
                    return false;
                }
                // Enter each directory at most once per canonical path.
                if follow_symlinks && entry.file_type().is_dir() {
                    if let Ok(canonical) = entry.path().canonicalize() {
                        if !visited.insert(canonical) {
                            return false;
                        }
                    }
                }
                true
            });

        for entry in walker {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::debug!(found = results.len(), "scan cancelled");
                return results;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(cb) = on_error.as_mut() {
                        let path = err
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| root.clone());
                        cb(&path, &err.to_string());
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if !self.matches_extension(entry.path()) {
                continue;
            }

            let path = entry.into_path();
            if let Some(cb) = progress.as_mut() {
                let directory = path.parent().unwrap_or(&root).to_path_buf();
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                cb(results.len() + 1, &directory, &file_name);
            }
            results.push(path);
        }

        results
    }

    fn matches_extension(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
