//! Structured error types shared across SAGES crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`SageError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (dimensions, lengths, replica numbers, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the SAGES engine.
///
/// Variants are error families. Configuration errors are raised before any
/// simulation step runs, numerical errors abort the current run, and engine
/// errors are whatever the simulation collaborator reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SageError {
    /// Construction-time validation failures.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Singular projections and non-finite collective variables.
    #[error("numerical error: {0}")]
    Numerical(ErrorInfo),
    /// Failures reported by the simulation engine collaborator.
    #[error("engine error: {0}")]
    Engine(ErrorInfo),
    /// Serialization, checkpoint and configuration file errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SageError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SageError::Config(info)
            | SageError::Numerical(info)
            | SageError::Engine(info)
            | SageError::Serde(info) => info,
        }
    }

    /// Shorthand for the stable error code.
    pub fn code(&self) -> &str {
        &self.info().code
    }

    /// Whether the error was raised by construction-time validation.
    pub fn is_config(&self) -> bool {
        matches!(self, SageError::Config(_))
    }

    /// Whether the error is a numerical failure inside the update path.
    pub fn is_numerical(&self) -> bool {
        matches!(self, SageError::Numerical(_))
    }

    /// Builds the error returned when collective variable and grid dimensions disagree.
    pub fn dimension_mismatch(what: &str, expected: usize, found: usize) -> Self {
        SageError::Config(
            ErrorInfo::new(
                "dimension-mismatch",
                format!("{what} dimensions must match"),
            )
            .with_context("expected", expected.to_string())
            .with_context("found", found.to_string()),
        )
    }

    /// Builds the error returned when a per-replica list has the wrong length.
    pub fn length_mismatch(name: &str, expected: usize, found: usize) -> Self {
        SageError::Config(
            ErrorInfo::new(
                "length-mismatch",
                format!("provided list argument {name} has not the correct length"),
            )
            .with_context("argument", name)
            .with_context("expected", expected.to_string())
            .with_context("found", found.to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_and_hint() {
        let err = SageError::Config(
            ErrorInfo::new("invalid-grid", "grid bounds are inverted")
                .with_context("axis", "0")
                .with_hint("swap lower and upper"),
        );
        let text = err.to_string();
        assert!(text.starts_with("config error: grid bounds are inverted"));
        assert!(text.contains("axis=0"));
        assert!(text.contains("hint: swap lower and upper"));
    }

    #[test]
    fn serde_tagging_is_stable() {
        let err = SageError::length_mismatch("ksprings", 10, 3);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"family\":\"Config\""));
        let restored: SageError = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, err);
        assert_eq!(restored.code(), "length-mismatch");
        assert_eq!(restored.info().context.get("found"), Some(&"3".to_string()));
    }
}
