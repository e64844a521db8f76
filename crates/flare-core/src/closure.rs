//! Dependency closure resolution.
//!
//! Aggregates fetcher output across all declared packages into one
//! deduplicated, exclusion-filtered sequence of library references. The
//! output is deterministic for a given input and cache state: packages are
//! resolved in declaration order, duplicates keep the first occurrence, and
//! surviving references preserve their relative order.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::error::Result;
use crate::fetch::{PackageFetcher, PackageId};
use crate::manifest::{DependencyManifest, ExclusionRule, LibraryRef};

/// Builds dependency manifests from declared packages.
pub struct ClosureBuilder<'a> {
    fetcher: &'a dyn PackageFetcher,
}

impl<'a> ClosureBuilder<'a> {
    pub fn new(fetcher: &'a dyn PackageFetcher) -> Self {
        Self { fetcher }
    }

    /// Resolve the closure for `packages`, applying `exclusions`.
    ///
    /// Fetches run concurrently across distinct packages, but the result
    /// keeps declaration order, so listing a package earlier lets it shadow
    /// a library contributed by a later one.
    pub fn build(
        &self,
        packages: &[PackageId],
        exclusions: &[ExclusionRule],
    ) -> Result<DependencyManifest> {
        let fetched: Vec<Vec<LibraryRef>> = packages
            .par_iter()
            .map(|pkg| self.fetcher.fetch(pkg))
            .collect::<Result<_>>()?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut refs: Vec<LibraryRef> = Vec::new();

        for lib in fetched.into_iter().flatten() {
            if !seen.insert(lib.key()) {
                // Same library from a later package: first declaration wins.
                tracing::debug!(
                    "dropping duplicate library {} from package {}",
                    lib.name,
                    lib.source_package
                );
                continue;
            }
            refs.push(lib);
        }

        for rule in exclusions {
            let before = refs.len();
            refs.retain(|lib| !rule.matches(lib));
            if refs.len() == before {
                // Matching nothing is permitted, not an error.
                tracing::debug!(
                    "exclusion {}:{} matched no library",
                    rule.package,
                    rule.library
                );
            } else {
                tracing::info!(
                    "excluded library {} from package {}",
                    rule.library,
                    rule.package
                );
            }
        }

        Ok(DependencyManifest::from_refs(refs))
    }
}
