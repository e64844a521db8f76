//! Package and exclusion declaration files.
//!
//! The source package carries two optional plain-text files next to the
//! function source: `packages.txt` declaring one `name version` pair per
//! line, and `exclude.txt` declaring one `package:library` pair per line.
//! Blank lines and `#` comments are ignored in both.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use flare_core::{ExclusionRule, PackageId};

/// Parse the package declaration file at `path`. A missing file means no
/// declared packages.
pub fn read_packages(path: &Path) -> Result<Vec<PackageId>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_packages(&text).with_context(|| format!("in {}", path.display()))
}

/// Parse the exclusion declaration file at `path`. A missing file means no
/// exclusions.
pub fn read_exclusions(path: &Path) -> Result<Vec<ExclusionRule>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse_exclusions(&text).with_context(|| format!("in {}", path.display()))
}

fn parse_packages(text: &str) -> Result<Vec<PackageId>> {
    let mut packages = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let Some(line) = strip_line(line) else {
            continue;
        };
        let mut parts = line.split_whitespace();
        let (Some(name), Some(version), None) = (parts.next(), parts.next(), parts.next())
        else {
            bail!("line {}: expected `name version`, got `{}`", number + 1, line);
        };
        packages.push(PackageId::new(name, version));
    }
    Ok(packages)
}

fn parse_exclusions(text: &str) -> Result<Vec<ExclusionRule>> {
    let mut rules = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let Some(line) = strip_line(line) else {
            continue;
        };
        let Some((package, library)) = line.split_once(':') else {
            bail!(
                "line {}: expected `package:library`, got `{}`",
                number + 1,
                line
            );
        };
        let (package, library) = (package.trim(), library.trim());
        if package.is_empty() || library.is_empty() {
            bail!("line {}: empty package or library name", number + 1);
        }
        rules.push(ExclusionRule {
            package: package.to_string(),
            library: library.to_string(),
        });
    }
    Ok(rules)
}

fn strip_line(line: &str) -> Option<&str> {
    let line = line.split('#').next().unwrap_or("").trim();
    (!line.is_empty()).then_some(line)
}
