//! Directory-backed package registry.
//!
//! Serves packages from a local directory tree laid out as
//! `<registry>/<name>/<version>/…`. Used for air-gapped builds and by the
//! test suite; behavior matches the HTTP fetcher except transport.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fetch::{FetchCache, PackageFetcher, PackageId};
use crate::manifest::LibraryRef;

/// Fetches packages from a local directory registry.
#[derive(Debug, Clone)]
pub struct DirFetcher {
    registry_root: PathBuf,
    cache: FetchCache,
}

impl DirFetcher {
    pub fn new(registry_root: impl Into<PathBuf>, cache: FetchCache) -> Self {
        Self {
            registry_root: registry_root.into(),
            cache,
        }
    }

    fn package_dir(&self, package: &PackageId) -> PathBuf {
        self.registry_root.join(&package.name).join(&package.version)
    }

    fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            let from = entry.path();
            let to = dst.join(entry.file_name());
            if from.is_dir() {
                fs::create_dir_all(&to)?;
                Self::copy_tree(&from, &to)?;
            } else {
                fs::copy(&from, &to)?;
            }
        }
        Ok(())
    }
}

impl PackageFetcher for DirFetcher {
    fn fetch(&self, package: &PackageId) -> Result<Vec<LibraryRef>> {
        let src = self.package_dir(package);
        if !self.cache.is_cached(package) && !src.is_dir() {
            return Err(Error::Fetch {
                package: package.to_string(),
                message: format!("not found in registry at {}", src.display()),
            });
        }

        self.cache.populate(package, |dir| {
            tracing::debug!("extracting {} from {}", package, src.display());
            Self::copy_tree(&src, dir)
        })?;

        self.cache.libraries(package)
    }
}
