//! Error types for flare-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::compile::Diagnostic;

/// Result type for flare-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in flare-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Package could not be fetched from the registry.
    #[error("failed to fetch package {package}: {message}")]
    Fetch { package: String, message: String },

    /// Compilation failed with one or more diagnostics.
    #[error("compilation failed with {} error(s)", .0.len())]
    Compile(Vec<Diagnostic>),

    /// Function specification could not be read or written.
    #[error("function specification error: {0}")]
    Manifest(String),

    /// Function source file was not found.
    #[error("function source not found at {0}")]
    SourceNotFound(PathBuf),

    /// Entry symbol was not found in the compiled artifact.
    #[error("entry symbol not found: {0}")]
    EntrySymbolNotFound(String),

    /// Failed to load a dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Artifact load failed after resolution was exhausted.
    #[error("load error: {0}")]
    Load(String),

    /// Toolchain error.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Specialize was called on an already specialized process.
    #[error("already specialized")]
    AlreadySpecialized,

    /// Specialize was called while another specialize is in flight.
    #[error("specialization already in progress")]
    SpecializeInProgress,

    /// Invoke was called before the process was specialized.
    #[error("no function loaded")]
    NotSpecialized,

    /// The loaded artifact failed during invocation.
    #[error("invocation error: {0}")]
    Invocation(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render compile diagnostics one per line, the way the builder
    /// reports them to its caller.
    pub fn render_diagnostics(&self) -> Option<String> {
        match self {
            Self::Compile(diags) => {
                let lines: Vec<String> = diags.iter().map(|d| d.to_string()).collect();
                Some(lines.join("\n"))
            }
            _ => None,
        }
    }
}
