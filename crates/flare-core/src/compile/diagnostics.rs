//! Compiler diagnostic parsing.
//!
//! rustc is invoked with `--error-format=json`; each stderr line is one
//! JSON diagnostic. Failed builds report these back to the caller with an
//! identifier and a human-readable message per error.

use std::fmt;

use serde::Deserialize;

/// A diagnostic reported by the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error code (e.g. "E0308") when the compiler assigned one.
    pub code: Option<String>,

    /// Human-readable message.
    pub message: String,

    /// Severity level.
    pub level: DiagnosticLevel,

    /// Primary source line, when known.
    pub line: Option<usize>,

    /// Full rendered form for display.
    pub rendered: Option<String>,
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
    Help,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }

    /// A diagnostic not originating from the compiler itself.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            level: DiagnosticLevel::Error,
            line: None,
            rendered: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
struct RustcDiagnostic {
    message: String,
    code: Option<RustcCode>,
    level: String,
    spans: Vec<RustcSpan>,
    rendered: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    line_start: usize,
    is_primary: bool,
}

/// Parse rustc `--error-format=json` stderr into diagnostics.
///
/// Unparseable lines (cargo chatter, panics) are skipped with a debug log.
pub fn parse_rustc_output(stderr: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for line in stderr.lines() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RustcDiagnostic>(line) {
            Ok(raw) => {
                let level = match raw.level.as_str() {
                    "error" => DiagnosticLevel::Error,
                    "warning" => DiagnosticLevel::Warning,
                    "note" => DiagnosticLevel::Note,
                    "help" => DiagnosticLevel::Help,
                    // "error: aborting due to ..." summaries and unknown
                    // levels carry no extra information.
                    _ => continue,
                };

                // Skip the trailing "aborting due to N previous errors".
                if raw.message.starts_with("aborting due to") {
                    continue;
                }

                diagnostics.push(Diagnostic {
                    code: raw.code.map(|c| c.code),
                    message: raw.message,
                    level,
                    line: raw
                        .spans
                        .iter()
                        .find(|s| s.is_primary)
                        .map(|s| s.line_start),
                    rendered: raw.rendered,
                });
            }
            Err(e) => {
                tracing::debug!("skipping non-JSON rustc output: {} ({})", e, line);
            }
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{"message":"mismatched types","code":{"code":"E0308"},"level":"error","spans":[{"line_start":3,"is_primary":true}],"rendered":"error[E0308]: mismatched types"}
{"message":"unused variable: `x`","code":null,"level":"warning","spans":[{"line_start":1,"is_primary":true}],"rendered":null}
{"message":"aborting due to 1 previous error","code":null,"level":"error","spans":[],"rendered":null}"#;

    #[test]
    fn test_parse_rustc_json() {
        let diags = parse_rustc_output(SAMPLE);
        assert_eq!(diags.len(), 2);

        assert_eq!(diags[0].code.as_deref(), Some("E0308"));
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
        assert_eq!(diags[0].line, Some(3));
        assert!(diags[0].is_error());

        assert_eq!(diags[1].level, DiagnosticLevel::Warning);
        assert!(!diags[1].is_error());
    }

    #[test]
    fn test_display_includes_code() {
        let diags = parse_rustc_output(SAMPLE);
        assert_eq!(diags[0].to_string(), "E0308: mismatched types");
        assert_eq!(diags[1].to_string(), "unused variable: `x`");
    }

    #[test]
    fn test_garbage_lines_skipped() {
        let diags = parse_rustc_output("not json\n\nthread 'main' panicked");
        assert!(diags.is_empty());
    }
}
