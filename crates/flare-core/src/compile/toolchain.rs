//! Rust toolchain discovery.

use std::path::PathBuf;
use std::process::Command;

use crate::error::{Error, Result};

/// Locates and describes the rustc used for function compilation.
#[derive(Debug, Clone)]
pub struct Toolchain {
    rustc_path: PathBuf,
    version: String,
}

impl Toolchain {
    /// Detect rustc on the PATH.
    pub fn new() -> Result<Self> {
        let rustc_path = which::which("rustc")
            .map_err(|_| Error::Toolchain("rustc not found in PATH".to_string()))?;
        let version = Self::rustc_version(&rustc_path)?;
        Ok(Self {
            rustc_path,
            version,
        })
    }

    /// Use an explicit rustc binary.
    pub fn with_rustc(rustc_path: PathBuf) -> Result<Self> {
        let version = Self::rustc_version(&rustc_path)?;
        Ok(Self {
            rustc_path,
            version,
        })
    }

    pub fn rustc_path(&self) -> &PathBuf {
        &self.rustc_path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn rustc_version(rustc: &PathBuf) -> Result<String> {
        let output = Command::new(rustc)
            .arg("--version")
            .output()
            .map_err(|e| Error::Toolchain(format!("failed to run rustc: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain("failed to get rustc version".to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolchain_detection() {
        let toolchain = Toolchain::new();
        assert!(toolchain.is_ok(), "should detect rustc on PATH");
        assert!(!toolchain.unwrap().version().is_empty());
    }

    #[test]
    fn test_missing_rustc_is_toolchain_error() {
        let err = Toolchain::with_rustc(PathBuf::from("/nonexistent/rustc")).unwrap_err();
        assert!(matches!(err, Error::Toolchain(_)));
    }
}
