//! Dependency manifest and function specification data model.
//!
//! The manifest is the deduplicated, exclusion-filtered closure of library
//! references a function compiles against. The function specification is
//! the persisted form of that closure plus the function identity, and is
//! the sole contract between the build phase and the run phase.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One resolvable binary library reference.
///
/// `name` is the library file name as it came out of the package
/// (e.g. `libjson.so`); it is the case-insensitive unique key within a
/// manifest. `path` is relative to the build cache while resolving and is
/// rewritten relative to the package root before the spec is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRef {
    pub name: String,
    pub source_package: String,
    pub path: PathBuf,
}

impl LibraryRef {
    /// Normalized lookup key: lowercased, extension stripped.
    pub fn key(&self) -> String {
        normalize_library_name(&self.name)
    }

    /// Crate name this library is referenced as during compilation:
    /// the file stem minus the platform `lib` prefix.
    pub fn crate_name(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        stem.strip_prefix("lib").unwrap_or(&stem).to_string()
    }
}

/// Normalize a library reference name for manifest lookup.
///
/// Lookups are case-insensitive and ignore any file extension, so
/// `Foo.so`, `libfoo.so` and `foo` all land on the same key modulo the
/// `lib` prefix, which is kept because it is part of the file name.
pub fn normalize_library_name(name: &str) -> String {
    let base = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    base.to_lowercase()
}

/// User-declared exclusion of one library from one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    pub package: String,
    pub library: String,
}

impl ExclusionRule {
    /// Whether this rule matches the given reference (case-insensitive).
    pub fn matches(&self, lib: &LibraryRef) -> bool {
        self.package.eq_ignore_ascii_case(&lib.source_package)
            && self.library.eq_ignore_ascii_case(&lib.name)
    }
}

/// Ordered set of surviving library references after dedup and exclusion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyManifest {
    libraries: Vec<LibraryRef>,
}

impl DependencyManifest {
    /// Build a manifest from an already deduplicated, filtered sequence.
    pub fn from_refs(libraries: Vec<LibraryRef>) -> Self {
        Self { libraries }
    }

    /// The surviving references, in declaration order.
    pub fn libraries(&self) -> &[LibraryRef] {
        &self.libraries
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Look up a reference by name: case-insensitive, extension ignored.
    pub fn lookup(&self, reference: &str) -> Option<&LibraryRef> {
        let key = normalize_library_name(reference);
        self.libraries.iter().find(|l| l.key() == key)
    }

    /// Rewrite every reference path via `f`, preserving order.
    ///
    /// Used by the build phase to re-root paths from the fetch cache into
    /// the deploy package's library directory.
    pub fn map_paths(&self, mut f: impl FnMut(&LibraryRef) -> PathBuf) -> Self {
        Self {
            libraries: self
                .libraries
                .iter()
                .map(|l| LibraryRef {
                    name: l.name.clone(),
                    source_package: l.source_package.clone(),
                    path: f(l),
                })
                .collect(),
        }
    }
}

/// Persisted function specification: the build→run contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Name of the function source file at the package root.
    pub function_name: String,

    /// The dependency manifest, paths relative to the package root.
    pub libraries: DependencyManifest,

    /// Hash of the function source at build time.
    pub content_hash: String,
}

impl FunctionSpec {
    /// Read and deserialize a specification from `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            Error::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Manifest(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Serialize and persist this specification at `path` atomically.
    ///
    /// Writes to a temporary sibling and renames over the destination so a
    /// concurrent reader never observes a partially written file. Any prior
    /// specification is replaced wholesale.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Manifest(format!("cannot serialize spec: {}", e)))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(|e| {
            Error::Manifest(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            Error::Manifest(format!("cannot rename into {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

/// Hash of the function source recorded in the specification.
///
/// FNV-1a with fixed constants: the value is persisted at build time and
/// compared by a server that may run a different toolchain, so it cannot
/// depend on the standard library's unspecified default hasher.
pub fn content_hash(source: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in source.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str, pkg: &str, path: &str) -> LibraryRef {
        LibraryRef {
            name: name.to_string(),
            source_package: pkg.to_string(),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_normalize_library_name() {
        assert_eq!(normalize_library_name("libFoo.so"), "libfoo");
        assert_eq!(normalize_library_name("libfoo"), "libfoo");
        assert_eq!(normalize_library_name("Foo.Bar.dll"), "foo.bar");
    }

    #[test]
    fn test_crate_name_strips_prefix_and_extension() {
        assert_eq!(lib("libjson.so", "p", "x").crate_name(), "json");
        assert_eq!(lib("json.so", "p", "x").crate_name(), "json");
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let manifest =
            DependencyManifest::from_refs(vec![lib("libFoo.so", "p", "libs/libFoo.so")]);
        assert!(manifest.lookup("libfoo").is_some());
        assert!(manifest.lookup("LIBFOO.so").is_some());
        assert!(manifest.lookup("libbar").is_none());
    }

    #[test]
    fn test_exclusion_rule_matches() {
        let rule = ExclusionRule {
            package: "P".to_string(),
            library: "libfoo.so".to_string(),
        };
        assert!(rule.matches(&lib("libFoo.so", "p", "x")));
        assert!(!rule.matches(&lib("libFoo.so", "other", "x")));
        assert!(!rule.matches(&lib("libbar.so", "p", "x")));
    }

    #[test]
    fn test_spec_roundtrip_and_field_names() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("func.json");

        let spec = FunctionSpec {
            function_name: "func.rs".to_string(),
            libraries: DependencyManifest::from_refs(vec![lib(
                "libjson.so",
                "json-tools",
                "libs/libjson.so",
            )]),
            content_hash: content_hash("fn main() {}"),
        };
        spec.write_atomic(&path).unwrap();

        // The persisted document uses the wire field names.
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"functionName\""));
        assert!(raw.contains("\"sourcePackage\""));
        assert!(raw.contains("\"contentHash\""));

        let back = FunctionSpec::read(&path).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("func.json");

        let first = FunctionSpec {
            function_name: "func.rs".to_string(),
            libraries: DependencyManifest::from_refs(vec![lib("liba.so", "p", "libs/liba.so")]),
            content_hash: "00".to_string(),
        };
        first.write_atomic(&path).unwrap();

        let second = FunctionSpec {
            function_name: "func.rs".to_string(),
            libraries: DependencyManifest::default(),
            content_hash: "01".to_string(),
        };
        second.write_atomic(&path).unwrap();

        let back = FunctionSpec::read(&path).unwrap();
        assert_eq!(back, second);
        // No temp leftovers.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));

        // Known FNV-1a vectors: a builder and a server on different
        // toolchains must compute identical hashes.
        assert_eq!(content_hash(""), "cbf29ce484222325");
        assert_eq!(content_hash("abc"), "e71fa2190541574b");
    }
}
