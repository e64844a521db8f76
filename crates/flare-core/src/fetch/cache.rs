//! Local fetch cache.
//!
//! Extracted packages live under one directory per package version. A
//! version directory is only considered valid once its completion marker
//! exists; extraction happens under an exclusive file lock so concurrent
//! builds sharing a cache never observe a partially-extracted package.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{Error, Result};
use crate::fetch::PackageId;
use crate::manifest::LibraryRef;

/// Marker file written after a package version is fully extracted.
const COMPLETE_MARKER: &str = ".complete";

/// Library file extensions recognized when scanning an extracted package.
const LIBRARY_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];

/// On-disk cache of extracted package versions.
#[derive(Debug, Clone)]
pub struct FetchCache {
    root: PathBuf,
}

impl FetchCache {
    /// Open (and create if missing) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding one extracted package version.
    pub fn entry_dir(&self, package: &PackageId) -> PathBuf {
        self.root.join(package.cache_key())
    }

    /// Whether this package version is already fully extracted.
    pub fn is_cached(&self, package: &PackageId) -> bool {
        self.entry_dir(package).join(COMPLETE_MARKER).exists()
    }

    /// Populate the cache entry for `package` if it is not cached yet.
    ///
    /// `extract` is called with the entry directory and must place the
    /// package's files there. The call is skipped entirely when a valid
    /// cached copy exists, and is serialized per package version via an
    /// exclusive lock file, so two concurrent builds cannot both extract
    /// into the same entry.
    pub fn populate(
        &self,
        package: &PackageId,
        extract: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<()> {
        if self.is_cached(package) {
            tracing::debug!("package {} served from cache", package);
            return Ok(());
        }

        let lock = self.acquire_lock(package)?;

        // Re-check under the lock: another build may have finished first.
        if self.is_cached(package) {
            drop(lock);
            return Ok(());
        }

        let dir = self.entry_dir(package);
        // A half-extracted entry from a crashed build gets discarded.
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        extract(&dir)?;
        File::create(dir.join(COMPLETE_MARKER))?;

        drop(lock);
        Ok(())
    }

    /// Scan an extracted package version for the libraries it provides.
    ///
    /// Returned references carry absolute cache paths and the originating
    /// package name; order is stable (sorted by file name) so closure
    /// output is deterministic for a given cache state.
    pub fn libraries(&self, package: &PackageId) -> Result<Vec<LibraryRef>> {
        let dir = self.entry_dir(package);
        let mut files: Vec<PathBuf> = Vec::new();
        collect_library_files(&dir, &mut files)?;
        files.sort();

        Ok(files
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(LibraryRef {
                    name,
                    source_package: package.name.clone(),
                    path,
                })
            })
            .collect())
    }

    fn acquire_lock(&self, package: &PackageId) -> Result<File> {
        let lock_path = self.root.join(format!("{}.lock", package.cache_key()));
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive().map_err(|e| Error::Fetch {
            package: package.to_string(),
            message: format!("cannot lock cache entry: {}", e),
        })?;
        Ok(lock)
    }
}

/// Whether a path looks like a binary library file.
pub fn is_library_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| LIBRARY_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn collect_library_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_library_files(&path, out)?;
        } else if is_library_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}
