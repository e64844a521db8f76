//! Build-phase engine.
//!
//! Runs once per deployment: resolve the dependency closure, trial-compile
//! the function against it, copy the surviving libraries and the function
//! sources into the deploy package, and persist the function specification.
//! A compile failure aborts the whole build; nothing is copied and no spec
//! is written.

use std::fs;
use std::path::PathBuf;

use crate::closure::ClosureBuilder;
use crate::compile::{CompileOptions, Compiler, Toolchain};
use crate::error::{Error, Result};
use crate::fetch::{PackageFetcher, PackageId};
use crate::manifest::{content_hash, DependencyManifest, ExclusionRule, FunctionSpec};
use crate::paths::{PackageLayout, FUNCTION_FILE, LIB_DIR};

/// Orchestrates the build phase for one function package.
pub struct BuildEngine {
    src_pkg: PackageLayout,
    deploy_pkg: PackageLayout,
    compiler: Compiler,
}

impl BuildEngine {
    /// Create an engine building `src_pkg` into `deploy_pkg`.
    ///
    /// The two may be the same directory; the original builder worked
    /// in-place and let outer packaging pick up the result.
    pub fn new(src_pkg: impl Into<PathBuf>, deploy_pkg: impl Into<PathBuf>) -> Result<Self> {
        let deploy_pkg = PackageLayout::new(deploy_pkg);
        let options = CompileOptions {
            out_dir: deploy_pkg.root.join(".build"),
            ..Default::default()
        };
        Ok(Self {
            src_pkg: PackageLayout::new(src_pkg),
            deploy_pkg,
            compiler: Compiler::new(Toolchain::new()?, options),
        })
    }

    /// Run the whole build: closure, trial compile, copy-out, spec write.
    ///
    /// Returns the persisted specification on success.
    pub fn build(
        &self,
        packages: &[PackageId],
        exclusions: &[ExclusionRule],
        fetcher: &dyn PackageFetcher,
    ) -> Result<FunctionSpec> {
        let manifest = ClosureBuilder::new(fetcher).build(packages, exclusions)?;
        tracing::info!(
            "resolved closure of {} libraries from {} packages",
            manifest.len(),
            packages.len()
        );

        let source_path = self.src_pkg.function_source();
        let source = fs::read_to_string(&source_path)
            .map_err(|_| Error::SourceNotFound(source_path.clone()))?;

        // Trial compile against cache-local library paths. Failure is fatal
        // to the build; the caller gets the diagnostics.
        self.compiler
            .compile(&source_path, &manifest, &self.src_pkg.root)?;
        tracing::info!("trial compile succeeded");

        self.copy_sources()?;

        let spec = FunctionSpec {
            function_name: FUNCTION_FILE.to_string(),
            libraries: self.copy_libraries(&manifest)?,
            content_hash: content_hash(&source),
        };
        spec.write_atomic(&self.deploy_pkg.spec_file())?;
        tracing::info!(
            "wrote function specification to {}",
            self.deploy_pkg.spec_file().display()
        );

        Ok(spec)
    }

    /// Copy the function sources into the deploy package so the runtime
    /// can resolve `function_name` (and any `module.function` entry)
    /// against the deploy root. In-place builds skip this.
    fn copy_sources(&self) -> Result<()> {
        if self.src_pkg.root == self.deploy_pkg.root {
            return Ok(());
        }
        if let (Ok(src), Ok(deploy)) = (
            fs::canonicalize(&self.src_pkg.root),
            fs::canonicalize(&self.deploy_pkg.root),
        ) {
            if src == deploy {
                return Ok(());
            }
        }
        fs::create_dir_all(&self.deploy_pkg.root)?;
        copy_source_tree(&self.src_pkg.root, &self.deploy_pkg.root)
    }

    /// Copy every manifest library into the deploy package's library
    /// directory, rewriting paths relative to the package root so the
    /// persisted manifest is independent of the build machine's cache.
    fn copy_libraries(&self, manifest: &DependencyManifest) -> Result<DependencyManifest> {
        let lib_dir = self.deploy_pkg.ensure_lib_dir()?;

        for lib in manifest.libraries() {
            let dest = lib_dir.join(&lib.name);
            fs::copy(&lib.path, &dest).map_err(|e| {
                Error::Manifest(format!(
                    "cannot copy {} into {}: {}",
                    lib.path.display(),
                    lib_dir.display(),
                    e
                ))
            })?;
            tracing::debug!("copied {} to {}", lib.path.display(), dest.display());
        }

        Ok(manifest.map_paths(|lib| PathBuf::from(LIB_DIR).join(&lib.name)))
    }
}

/// Recursively copy `.rs` files from `src` into `dst`, skipping hidden
/// directories and the library directory.
fn copy_source_tree(src: &std::path::Path, dst: &std::path::Path) -> Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let name = entry.file_name();
        let hidden = name.to_str().is_some_and(|n| n.starts_with('.'));
        if from.is_dir() {
            if hidden || name.to_str() == Some(LIB_DIR) {
                continue;
            }
            let to = dst.join(&name);
            fs::create_dir_all(&to)?;
            copy_source_tree(&from, &to)?;
        } else if from.extension().and_then(|e| e.to_str()) == Some("rs") {
            fs::copy(&from, dst.join(&name))?;
            tracing::debug!("copied source {} to {}", from.display(), dst.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::fetch::{DirFetcher, FetchCache};
    use crate::paths::SPEC_FILE;

    fn write_registry_package(root: &Path, name: &str, version: &str, libs: &[&str]) {
        let dir = root.join(name).join(version);
        fs::create_dir_all(&dir).unwrap();
        for lib in libs {
            fs::write(dir.join(lib), b"binary").unwrap();
        }
    }

    fn engine_with_registry(temp: &Path) -> (BuildEngine, DirFetcher, PathBuf) {
        let registry = temp.join("registry");
        write_registry_package(&registry, "json-tools", "1.0.0", &["libjson.so"]);
        let cache = FetchCache::new(temp.join("cache")).unwrap();
        let fetcher = DirFetcher::new(registry, cache);

        let src = temp.join("src-pkg");
        fs::create_dir_all(&src).unwrap();
        let engine = BuildEngine::new(&src, &src).unwrap();
        (engine, fetcher, src)
    }

    #[test]
    fn test_failed_compile_persists_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let (engine, fetcher, src) = engine_with_registry(temp.path());

        fs::write(src.join(FUNCTION_FILE), "this is not rust {{{").unwrap();

        let err = engine
            .build(&[PackageId::new("json-tools", "1.0.0")], &[], &fetcher)
            .unwrap_err();
        assert!(matches!(err, Error::Compile(_)));

        // No spec, no copied libraries.
        assert!(!src.join(SPEC_FILE).exists());
        assert!(!src.join(LIB_DIR).join("libjson.so").exists());
    }

    #[test]
    fn test_missing_source_aborts_before_copy() {
        let temp = tempfile::TempDir::new().unwrap();
        let (engine, fetcher, src) = engine_with_registry(temp.path());

        let err = engine
            .build(&[PackageId::new("json-tools", "1.0.0")], &[], &fetcher)
            .unwrap_err();
        assert!(matches!(err, Error::SourceNotFound(_)));
        assert!(!src.join(SPEC_FILE).exists());
    }

    #[test]
    fn test_successful_build_writes_spec_and_libraries() {
        let temp = tempfile::TempDir::new().unwrap();
        let (engine, fetcher, src) = engine_with_registry(temp.path());

        // A function with no imports: the manifest library is referenced
        // but unused, which compiles fine.
        fs::write(
            src.join(FUNCTION_FILE),
            r#"
#[no_mangle]
pub extern "C" fn handler(
    _req: *const u8,
    _len: usize,
    _out: *mut *mut u8,
    _out_len: *mut usize,
) -> i32 {
    0
}
"#,
        )
        .unwrap();

        // The fake .so is not a real dylib, so hand the engine an empty
        // closure and verify persistence plumbing separately from linking.
        let spec = engine.build(&[], &[], &fetcher).unwrap();
        assert_eq!(spec.function_name, FUNCTION_FILE);
        assert!(spec.libraries.is_empty());
        assert!(src.join(SPEC_FILE).exists());

        let back = FunctionSpec::read(&src.join(SPEC_FILE)).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_split_build_copies_sources_to_deploy_package() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("src-pkg");
        let deploy = temp.path().join("deploy-pkg");
        fs::create_dir_all(&src).unwrap();

        fs::write(
            src.join(FUNCTION_FILE),
            r#"
#[no_mangle]
pub extern "C" fn handler(
    _req: *const u8,
    _len: usize,
    _out: *mut *mut u8,
    _out_len: *mut usize,
) -> i32 {
    0
}
"#,
        )
        .unwrap();
        fs::write(src.join("helpers.rs"), "pub fn noop() {}\n").unwrap();
        fs::write(src.join("packages.txt"), "# none\n").unwrap();

        let cache = FetchCache::new(temp.path().join("cache")).unwrap();
        let fetcher = DirFetcher::new(temp.path().join("registry"), cache);
        let engine = BuildEngine::new(&src, &deploy).unwrap();
        engine.build(&[], &[], &fetcher).unwrap();

        // The deploy package must be a complete run-phase input: the spec
        // plus every source the loader can be pointed at.
        assert!(deploy.join(SPEC_FILE).exists());
        assert!(deploy.join(FUNCTION_FILE).exists());
        assert!(deploy.join("helpers.rs").exists());
        // Non-source build inputs stay behind.
        assert!(!deploy.join("packages.txt").exists());
    }

    #[test]
    fn test_copied_paths_are_package_relative() {
        let temp = tempfile::TempDir::new().unwrap();
        let (engine, fetcher, _src) = engine_with_registry(temp.path());

        let manifest = ClosureBuilder::new(&fetcher)
            .build(&[PackageId::new("json-tools", "1.0.0")], &[])
            .unwrap();
        let rewritten = engine.copy_libraries(&manifest).unwrap();

        let lib = &rewritten.libraries()[0];
        assert_eq!(lib.path, PathBuf::from("libs/libjson.so"));
        assert!(engine.deploy_pkg.lib_dir().join("libjson.so").exists());
    }
}
