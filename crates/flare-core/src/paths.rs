//! Function package layout.
//!
//! Provides the well-known file locations inside a function package,
//! ensuring the builder and the runtime agree on where things live.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Default function source file name at the package root.
pub const FUNCTION_FILE: &str = "func.rs";

/// Persisted function specification file name.
pub const SPEC_FILE: &str = "func.json";

/// Directory inside the deploy package that holds copied libraries.
pub const LIB_DIR: &str = "libs";

/// Package declaration file consumed by the builder.
pub const PACKAGES_FILE: &str = "packages.txt";

/// Exclusion declaration file consumed by the builder.
pub const EXCLUDES_FILE: &str = "exclude.txt";

/// Layout of a function package on disk.
///
/// ```text
/// <package root>/
/// ├── func.rs       # function source (default entry module)
/// ├── func.json     # persisted function specification
/// ├── packages.txt  # declared packages (build input)
/// ├── exclude.txt   # declared exclusions (build input)
/// └── libs/         # libraries copied in by the builder
/// ```
#[derive(Debug, Clone)]
pub struct PackageLayout {
    /// The package root directory.
    pub root: PathBuf,
}

impl PackageLayout {
    /// Create a layout rooted at the given package directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path to the default function source file.
    pub fn function_source(&self) -> PathBuf {
        self.root.join(FUNCTION_FILE)
    }

    /// Path to the persisted function specification.
    pub fn spec_file(&self) -> PathBuf {
        self.root.join(SPEC_FILE)
    }

    /// Path to the library directory.
    pub fn lib_dir(&self) -> PathBuf {
        self.root.join(LIB_DIR)
    }

    /// Path to the package declaration file.
    pub fn packages_file(&self) -> PathBuf {
        self.root.join(PACKAGES_FILE)
    }

    /// Path to the exclusion declaration file.
    pub fn excludes_file(&self) -> PathBuf {
        self.root.join(EXCLUDES_FILE)
    }

    /// Create the library directory if it does not exist yet.
    pub fn ensure_lib_dir(&self) -> Result<PathBuf> {
        let dir = self.lib_dir();
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Whether the given path lies inside the library directory.
    ///
    /// The runtime loader uses this to skip the copied-in library subtree
    /// when searching the package for an entry module.
    pub fn is_in_lib_dir(&self, path: &Path) -> bool {
        path.starts_with(self.lib_dir())
    }
}
