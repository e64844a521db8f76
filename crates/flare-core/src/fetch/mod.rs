//! Package fetching.
//!
//! A fetcher retrieves the contents of one declared package version and
//! returns the binary library references it provides, with paths pointing
//! into the local fetch cache. Package versions are treated as immutable:
//! once a version is cached it is never re-checked for staleness.

mod cache;
mod dir;
mod http;

pub use cache::FetchCache;
pub use dir::DirFetcher;
pub use http::HttpFetcher;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::LibraryRef;

/// A declared package: name plus exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Cache key for this package version.
    pub fn cache_key(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Retrieves package contents and lists the libraries they provide.
///
/// Implementations must be idempotent: fetching the same package version
/// twice returns equivalent references without re-downloading when a valid
/// cached copy exists. Fetches for distinct packages may run concurrently,
/// so implementations must be shareable across threads.
pub trait PackageFetcher: Send + Sync {
    /// Fetch one package version and return its library references.
    fn fetch(&self, package: &PackageId) -> Result<Vec<LibraryRef>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key() {
        let pkg = PackageId::new("json-tools", "1.2.0");
        assert_eq!(pkg.cache_key(), "json-tools-1.2.0");
        assert_eq!(pkg.to_string(), "json-tools 1.2.0");
    }
}
