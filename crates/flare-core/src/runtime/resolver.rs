//! Dynamic library resolution hook.
//!
//! When the platform loader fails to bind a referenced library during
//! artifact load (transitive references are not in the direct compile-time
//! reference list), the resolver looks the missing name up against the
//! manifest and, on a hit, loads that library file into the process with
//! global symbol visibility so the next load attempt can bind it.
//!
//! The runtime loader keeps one resolver per package specification;
//! resolved libraries are cached per name so repeated misses for the same
//! reference never re-load the file, and unrelated resolutions do not
//! serialize on a single lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::manifest::{normalize_library_name, DependencyManifest};

/// A library loaded into the process and kept alive for its lifetime.
///
/// The handle is intentionally opaque: its only purpose is to pin the
/// library's symbols in the process image.
pub struct SharedLibrary {
    pub(crate) _library: libloading::Library,
}

/// Opens library files on behalf of the resolver.
///
/// Split out as a trait so tests can observe and count open calls.
pub trait LibraryHost: Send + Sync {
    /// Load the library at `path` with process-global symbol visibility.
    fn open_global(&self, path: &Path) -> Result<SharedLibrary>;
}

/// The real platform loader.
pub struct PlatformHost;

impl LibraryHost for PlatformHost {
    #[cfg(unix)]
    fn open_global(&self, path: &Path) -> Result<SharedLibrary> {
        use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

        // RTLD_GLOBAL is the single registration point the platform gives
        // us: symbols become visible to subsequent loads in this process.
        let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }?;
        Ok(SharedLibrary {
            _library: library.into(),
        })
    }

    #[cfg(not(unix))]
    fn open_global(&self, path: &Path) -> Result<SharedLibrary> {
        let library = unsafe { libloading::Library::new(path) }?;
        Ok(SharedLibrary { _library: library })
    }
}

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The reference was found in the manifest and its library is loaded.
    Resolved,
    /// The reference is not in the manifest (or its file failed to load);
    /// a warning has been logged. The underlying runtime's own error
    /// surfaces downstream only if the missing symbol is actually used.
    Unresolved,
}

type Slot = Arc<Mutex<Option<Arc<SharedLibrary>>>>;

/// Resolves missing library references against a dependency manifest.
pub struct LibraryResolver {
    manifest: DependencyManifest,
    lib_root: PathBuf,
    host: Arc<dyn LibraryHost>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl LibraryResolver {
    pub fn new(
        manifest: DependencyManifest,
        lib_root: impl Into<PathBuf>,
        host: Arc<dyn LibraryHost>,
    ) -> Self {
        Self {
            manifest,
            lib_root: lib_root.into(),
            host,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one missing reference by name.
    ///
    /// The name is matched case-insensitively with any extension stripped.
    /// Safe under concurrent misses for different names; a second miss for
    /// the same name reuses the cached library without touching the file.
    pub fn resolve(&self, reference: &str) -> Resolution {
        let key = normalize_library_name(reference);

        let slot = {
            let mut slots = self.slots.lock().expect("resolver slot table poisoned");
            slots.entry(key.clone()).or_default().clone()
        };

        // Per-name lock: concurrent resolutions of different names proceed
        // independently; a second resolution of this name waits here and
        // then finds the cached handle.
        let mut guard = slot.lock().expect("resolver slot poisoned");
        if guard.is_some() {
            tracing::debug!("library {} already resolved, reusing", reference);
            return Resolution::Resolved;
        }

        let Some(lib) = self.manifest.lookup(&key) else {
            tracing::warn!("unable to resolve library reference {}", reference);
            return Resolution::Unresolved;
        };

        let path = if lib.path.is_absolute() {
            lib.path.clone()
        } else {
            self.lib_root.join(&lib.path)
        };

        match self.host.open_global(&path) {
            Ok(shared) => {
                tracing::info!(
                    "resolved {} to {} from package {}",
                    reference,
                    path.display(),
                    lib.source_package
                );
                *guard = Some(Arc::new(shared));
                Resolution::Resolved
            }
            Err(e) => {
                tracing::warn!("failed to load {} for {}: {}", path.display(), reference, e);
                Resolution::Unresolved
            }
        }
    }

    /// The manifest this resolver serves.
    pub fn manifest(&self) -> &DependencyManifest {
        &self.manifest
    }

    /// Number of references resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.slots
            .lock()
            .expect("resolver slot table poisoned")
            .values()
            .filter(|slot| slot.lock().map(|g| g.is_some()).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::manifest::LibraryRef;

    /// Host stub counting open calls without touching the real loader.
    struct CountingHost {
        opens: AtomicUsize,
        fail: bool,
    }

    impl CountingHost {
        fn new(fail: bool) -> Self {
            Self {
                opens: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl LibraryHost for CountingHost {
        fn open_global(&self, path: &Path) -> Result<SharedLibrary> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::Error::Load(format!(
                    "cannot open {}",
                    path.display()
                )));
            }
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

    fn manifest() -> DependencyManifest {
        DependencyManifest::from_refs(vec![LibraryRef {
            name: "libFoo.so".to_string(),
            source_package: "P".to_string(),
            path: PathBuf::from("libs/libFoo.so"),
        }])
    }

    #[test]
    fn test_resolve_hit_loads_once() {
        let host = Arc::new(CountingHost::new(false));
        let resolver = LibraryResolver::new(manifest(), "/pkg", host.clone());

        assert_eq!(resolver.resolve("libfoo"), Resolution::Resolved);
        assert_eq!(host.opens.load(Ordering::SeqCst), 1);

        // Repeated lookups, however spelled, reuse the per-name cache.
        assert_eq!(resolver.resolve("libFoo.so"), Resolution::Resolved);
        assert_eq!(resolver.resolve("LIBFOO"), Resolution::Resolved);
        assert_eq!(host.opens.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.resolved_count(), 1);
    }

    #[test]
    fn test_resolve_miss_is_unresolved() {
        let host = Arc::new(CountingHost::new(false));
        let resolver = LibraryResolver::new(manifest(), "/pkg", host.clone());

        assert_eq!(resolver.resolve("libbar"), Resolution::Unresolved);
        // No file was touched for a manifest miss.
        assert_eq!(host.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_open_is_unresolved_and_retried() {
        let host = Arc::new(CountingHost::new(true));
        let resolver = LibraryResolver::new(manifest(), "/pkg", host.clone());

        assert_eq!(resolver.resolve("libfoo"), Resolution::Unresolved);
        assert_eq!(resolver.resolve("libfoo"), Resolution::Unresolved);
        // A failed open is not cached as success.
        assert_eq!(host.opens.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.resolved_count(), 0);
    }

    #[test]
    fn test_concurrent_misses_for_same_name_load_once() {
        let host = Arc::new(CountingHost::new(false));
        let resolver = Arc::new(LibraryResolver::new(manifest(), "/pkg", host.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                std::thread::spawn(move || resolver.resolve("libfoo"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Resolution::Resolved);
        }
        assert_eq!(host.opens.load(Ordering::SeqCst), 1);
    }
}
