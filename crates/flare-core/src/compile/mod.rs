//! Compilation pipeline.
//!
//! One shared compile routine serves both phases: the build-time trial
//! compile and the run-time real compile take the same manifest and produce
//! the same compiler invocation, which is what makes closure determinism
//! enforceable rather than accidental.

mod diagnostics;
mod driver;
mod toolchain;

pub use diagnostics::{Diagnostic, DiagnosticLevel, parse_rustc_output};
pub use driver::{CompileOptions, Compiler};
pub use toolchain::Toolchain;

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}
