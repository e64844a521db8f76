//! The shared compile routine.
//!
//! Both phases funnel through [`Compiler::compile`]: the builder's trial
//! pass and the runtime's real pass hand it the same manifest and get the
//! same rustc invocation, reference for reference.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use crate::compile::{dylib_extension, dylib_prefix, parse_rustc_output, Diagnostic, Toolchain};
use crate::error::{Error, Result};
use crate::manifest::DependencyManifest;

/// Crate name given to every compiled function artifact.
const ARTIFACT_CRATE_NAME: &str = "flare_fn";

/// Configuration for function compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Directory for the compiled artifact.
    pub out_dir: PathBuf,

    /// Optimization level (0-3).
    pub opt_level: u8,

    /// Emit debug info.
    pub debug_info: bool,

    /// Additional rustc flags.
    pub extra_rustc_flags: Vec<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            out_dir: std::env::temp_dir().join("flare-build"),
            opt_level: 0,
            debug_info: true,
            extra_rustc_flags: Vec::new(),
        }
    }
}

/// Compiles a function source against a dependency manifest.
pub struct Compiler {
    toolchain: Toolchain,
    options: CompileOptions,
}

impl Compiler {
    pub fn new(toolchain: Toolchain, options: CompileOptions) -> Self {
        Self { toolchain, options }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Compile `source_file` to a dynamic library artifact.
    ///
    /// Every manifest reference is added as a compile-time `--extern` by
    /// absolute path; relative manifest paths are resolved against
    /// `lib_root`. On failure the pipeline aborts with the compiler's
    /// error diagnostics; nothing is persisted by this routine.
    pub fn compile(
        &self,
        source_file: &Path,
        manifest: &DependencyManifest,
        lib_root: &Path,
    ) -> Result<PathBuf> {
        if !source_file.is_file() {
            return Err(Error::SourceNotFound(source_file.to_path_buf()));
        }
        fs::create_dir_all(&self.options.out_dir)?;

        let artifact = self.options.out_dir.join(format!(
            "{}{}.{}",
            dylib_prefix(),
            ARTIFACT_CRATE_NAME,
            dylib_extension()
        ));

        let mut cmd = Command::new(self.toolchain.rustc_path());
        cmd.arg(source_file)
            .arg("--crate-type=cdylib")
            .arg("--crate-name")
            .arg(ARTIFACT_CRATE_NAME)
            .arg("--edition=2021")
            .arg("-o")
            .arg(&artifact)
            .arg("--error-format=json")
            .arg(format!("-Copt-level={}", self.options.opt_level))
            .arg("-Cprefer-dynamic");

        if self.options.debug_info {
            cmd.arg("-g");
        }

        for lib in manifest.libraries() {
            let path = if lib.path.is_absolute() {
                lib.path.clone()
            } else {
                lib_root.join(&lib.path)
            };
            if let Some(dir) = path.parent() {
                cmd.arg("-L").arg(dir);
            }
            cmd.arg("--extern")
                .arg(format!("{}={}", sanitize_crate_name(&lib.crate_name()), path.display()));
            tracing::debug!(
                "referencing library {} from package {} at {}",
                lib.name,
                lib.source_package,
                path.display()
            );
        }

        for flag in &self.options.extra_rustc_flags {
            cmd.arg(flag);
        }

        let start = Instant::now();
        let output = cmd
            .output()
            .map_err(|e| Error::Toolchain(format!("failed to run rustc: {}", e)))?;

        if output.status.success() {
            tracing::info!(
                "compiled {} in {} ms",
                source_file.display(),
                start.elapsed().as_millis()
            );
            return Ok(artifact);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let errors: Vec<Diagnostic> = parse_rustc_output(&stderr)
            .into_iter()
            .filter(|d| d.is_error())
            .collect();

        if errors.is_empty() {
            // JSON parsing yielded nothing; keep the raw output.
            return Err(Error::Compile(vec![Diagnostic::internal(
                stderr.into_owned(),
            )]));
        }
        for diag in &errors {
            tracing::error!("compile error: {}", diag);
        }
        Err(Error::Compile(errors))
    }
}

/// Turn a library file stem into a valid extern crate name.
fn sanitize_crate_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
