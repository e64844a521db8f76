//! Run-phase loader.
//!
//! Reads a function specification, compiles the function source with the
//! same shared routine the builder used, and loads the resulting artifact.
//! Library references the platform loader cannot bind directly are fed
//! through the [`LibraryResolver`] and the load is retried.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use libloading::Library;

use crate::compile::{CompileOptions, Compiler, Toolchain};
use crate::error::{Error, Result};
use crate::manifest::{content_hash, DependencyManifest, FunctionSpec};
use crate::paths::PackageLayout;
use crate::runtime::invoke::{call_entry, Artifact, EntryFn, InvokeRequest, InvokeResponse};
use crate::runtime::resolver::{LibraryHost, LibraryResolver, PlatformHost, Resolution};
use crate::runtime::DEFAULT_ENTRY_SYMBOL;

/// Loads function packages into the serving process.
///
/// One loader lives for the life of the process. It keeps a resolver per
/// package specification, so a repeated load of the same specification
/// reuses the per-name library cache instead of re-opening files.
pub struct RuntimeLoader {
    compiler: Compiler,
    host: Arc<dyn LibraryHost>,
    resolvers: Mutex<HashMap<PathBuf, Arc<LibraryResolver>>>,
}

/// A loaded function artifact: the library, its entry symbol, and the
/// resolver that pins any transitively loaded manifest libraries.
pub struct LoadedFunction {
    library: Library,
    symbol: String,
    resolver: Arc<LibraryResolver>,
}

impl RuntimeLoader {
    /// Create a loader with the default platform host.
    pub fn new(options: CompileOptions) -> Result<Self> {
        Self::with_host(options, Arc::new(PlatformHost))
    }

    /// Create a loader with a custom library host.
    pub fn with_host(options: CompileOptions, host: Arc<dyn LibraryHost>) -> Result<Self> {
        Ok(Self {
            compiler: Compiler::new(Toolchain::new()?, options),
            host,
            resolvers: Mutex::new(HashMap::new()),
        })
    }

    /// Load the function package at `package_root`.
    ///
    /// `entry` is the optional entry identifier from the specialize
    /// request: a plain module name, or `module.function` selecting both
    /// the source module and the exported symbol.
    pub fn load(&self, package_root: &Path, entry: Option<&str>) -> Result<LoadedFunction> {
        let layout = PackageLayout::new(package_root);
        let spec = FunctionSpec::read(&layout.spec_file())?;

        let (source_path, symbol) = self.resolve_entry(&layout, &spec, entry)?;
        tracing::info!(
            "specializing from {} (entry symbol {})",
            source_path.display(),
            symbol
        );

        if let Ok(source) = fs::read_to_string(&source_path) {
            if content_hash(&source) != spec.content_hash {
                // The source tree diverged from what was built; keep
                // serving but make the divergence visible.
                tracing::warn!(
                    "content hash mismatch for {}: source changed since build",
                    source_path.display()
                );
            }
        }

        let resolver = self.resolver_for(package_root, &spec.libraries);

        let artifact = self
            .compiler
            .compile(&source_path, &spec.libraries, package_root)?;

        let library = self.load_with_resolution(&artifact, &spec, &resolver)?;

        // Verify the entry symbol exists before declaring success.
        unsafe {
            library
                .get::<EntryFn>(symbol.as_bytes())
                .map_err(|_| Error::EntrySymbolNotFound(symbol.clone()))?;
        }

        Ok(LoadedFunction {
            library,
            symbol,
            resolver,
        })
    }

    /// Resolver for this package, kept across loads of the same
    /// specification so its per-name cache survives retries. A changed
    /// specification gets a fresh resolver.
    fn resolver_for(
        &self,
        package_root: &Path,
        manifest: &DependencyManifest,
    ) -> Arc<LibraryResolver> {
        let mut resolvers = self.resolvers.lock().expect("resolver table poisoned");
        if let Some(existing) = resolvers.get(package_root) {
            if existing.manifest() == manifest {
                return existing.clone();
            }
        }
        let resolver = Arc::new(LibraryResolver::new(
            manifest.clone(),
            package_root,
            self.host.clone(),
        ));
        resolvers.insert(package_root.to_path_buf(), resolver.clone());
        resolver
    }

    /// Resolve the entry identifier to a source file and symbol name.
    fn resolve_entry(
        &self,
        layout: &PackageLayout,
        spec: &FunctionSpec,
        entry: Option<&str>,
    ) -> Result<(PathBuf, String)> {
        let Some(entry) = entry.filter(|e| !e.trim().is_empty()) else {
            // v1 form: the file recorded at build time, default symbol.
            let path = layout.root.join(&spec.function_name);
            return Ok((path, DEFAULT_ENTRY_SYMBOL.to_string()));
        };

        match entry.split_once('.') {
            Some((module, function)) => {
                let path = self.find_module(layout, module)?;
                Ok((path, function.to_string()))
            }
            None => {
                let path = layout.root.join(format!("{}.rs", entry));
                Ok((path, DEFAULT_ENTRY_SYMBOL.to_string()))
            }
        }
    }

    /// Find `<module>.rs` anywhere under the package root, skipping the
    /// copied-in library directory and build scratch space.
    fn find_module(&self, layout: &PackageLayout, module: &str) -> Result<PathBuf> {
        let wanted = format!("{}.rs", module);

        fn walk(dir: &Path, layout: &PackageLayout, wanted: &str) -> Option<PathBuf> {
            let entries = fs::read_dir(dir).ok()?;
            let mut subdirs = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let hidden = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with('.'));
                    if !hidden && !layout.is_in_lib_dir(&path) {
                        subdirs.push(path);
                    }
                } else if path.file_name().and_then(|n| n.to_str()) == Some(wanted) {
                    return Some(path);
                }
            }
            subdirs.sort();
            subdirs
                .into_iter()
                .find_map(|d| walk(&d, layout, wanted))
        }

        walk(&layout.root, layout, &wanted)
            .ok_or_else(|| Error::SourceNotFound(layout.root.join(wanted)))
    }

    /// Load the artifact, feeding unbound library references through the
    /// resolver and retrying. Bounded by the manifest size: every retry
    /// must resolve a new reference or the load fails.
    fn load_with_resolution(
        &self,
        artifact: &Path,
        spec: &FunctionSpec,
        resolver: &LibraryResolver,
    ) -> Result<Library> {
        let max_attempts = spec.libraries.len() + 1;
        let mut last_missing: Option<String> = None;

        for _ in 0..=max_attempts {
            match unsafe { Library::new(artifact) } {
                Ok(library) => return Ok(library),
                Err(e) => {
                    let message = e.to_string();
                    let Some(missing) = parse_missing_library(&message) else {
                        return Err(Error::Load(message));
                    };
                    if last_missing.as_deref() == Some(missing.as_str()) {
                        // Resolution made no progress on this reference.
                        return Err(Error::Load(message));
                    }
                    tracing::debug!("load missed reference {}, consulting resolver", missing);
                    match resolver.resolve(&missing) {
                        Resolution::Resolved => {
                            last_missing = Some(missing);
                            continue;
                        }
                        Resolution::Unresolved => {
                            return Err(Error::Load(format!(
                                "unresolved library reference {}: {}",
                                missing, message
                            )));
                        }
                    }
                }
            }
        }

        Err(Error::Load(format!(
            "artifact {} did not load after {} resolution attempts",
            artifact.display(),
            max_attempts
        )))
    }
}

impl LoadedFunction {
    pub fn entry_symbol(&self) -> &str {
        &self.symbol
    }

    /// Number of manifest libraries pulled in by the resolution hook.
    pub fn resolved_libraries(&self) -> usize {
        self.resolver.resolved_count()
    }
}

impl Artifact for LoadedFunction {
    fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        call_entry(&self.library, &self.symbol, request)
    }
}

/// Extract the missing library file name from a platform loader error.
///
/// Linux reports `libfoo.so: cannot open shared object file: ...`; macOS
/// reports `dlopen(...): Library not loaded: @rpath/libfoo.dylib`. Both
/// shapes carry the file name as the path-like token nearest the front.
fn parse_missing_library(message: &str) -> Option<String> {
    for token in message.split([':', ' ', '(', ')', ',', '"']) {
        let candidate = Path::new(token.trim());
        if let Some(name) = candidate.file_name().and_then(|n| n.to_str()) {
            let lower = name.to_lowercase();
            if lower.ends_with(".so")
                || lower.contains(".so.")
                || lower.ends_with(".dylib")
                || lower.ends_with(".dll")
            {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::manifest::LibraryRef;
    use crate::runtime::resolver::SharedLibrary;

    struct CountingHost {
        opens: AtomicUsize,
    }

    impl LibraryHost for CountingHost {
        fn open_global(&self, _path: &Path) -> Result<SharedLibrary> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            // The current process image gives a real handle without
            // needing a fixture dylib on disk (glibc refuses to dlopen a
            // PIE executable by path).
            #[cfg(unix)]
            let library = libloading::os::unix::Library::this().into();
            #[cfg(not(unix))]
            let library = unsafe { libloading::Library::new(std::env::current_exe().unwrap()) }?;
            Ok(SharedLibrary { _library: library })
        }
    }

    fn manifest_with(name: &str) -> DependencyManifest {
        DependencyManifest::from_refs(vec![LibraryRef {
            name: name.to_string(),
            source_package: "P".to_string(),
            path: PathBuf::from(format!("libs/{}", name)),
        }])
    }

    #[test]
    fn test_repeat_load_reuses_resolver_cache() {
        let host = Arc::new(CountingHost {
            opens: AtomicUsize::new(0),
        });
        let loader = RuntimeLoader::with_host(CompileOptions::default(), host.clone()).unwrap();
        let manifest = manifest_with("libfoo.so");

        let first = loader.resolver_for(Path::new("/pkg"), &manifest);
        assert_eq!(first.resolve("libfoo"), Resolution::Resolved);
        assert_eq!(host.opens.load(Ordering::SeqCst), 1);

        // A later load of the same specification gets the same resolver;
        // the cached handle serves and no file is opened again.
        let second = loader.resolver_for(Path::new("/pkg"), &manifest);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.resolve("libfoo"), Resolution::Resolved);
        assert_eq!(host.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_changed_specification_gets_fresh_resolver() {
        let host = Arc::new(CountingHost {
            opens: AtomicUsize::new(0),
        });
        let loader = RuntimeLoader::with_host(CompileOptions::default(), host.clone()).unwrap();

        let first = loader.resolver_for(Path::new("/pkg"), &manifest_with("libfoo.so"));
        let second = loader.resolver_for(Path::new("/pkg"), &manifest_with("libbar.so"));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.resolve("libbar"), Resolution::Resolved);
        assert_eq!(second.resolve("libfoo"), Resolution::Unresolved);
    }

    #[test]
    fn test_parse_missing_library_linux() {
        let msg = "libjson.so: cannot open shared object file: No such file or directory";
        assert_eq!(parse_missing_library(msg), Some("libjson.so".to_string()));
    }

    #[test]
    fn test_parse_missing_library_macos() {
        let msg = "dlopen(/tmp/libflare_fn.dylib, 0x0005): Library not loaded: @rpath/libjson.dylib";
        assert_eq!(parse_missing_library(msg), Some("libjson.dylib".to_string()));
    }

    #[test]
    fn test_parse_missing_library_versioned() {
        let msg = "libssl.so.3: cannot open shared object file";
        assert_eq!(parse_missing_library(msg), Some("libssl.so.3".to_string()));
    }

    #[test]
    fn test_parse_missing_library_none() {
        assert_eq!(parse_missing_library("undefined symbol: frobnicate"), None);
    }
}
