//! Structured error types shared across repex crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`RepexError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (indices, sizes, paths, etc.).
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
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the replica-exchange engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum RepexError {
    /// Invalid or inconsistent construction input. Never retried.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// Checkpoint target lacks the data needed to resume.
    #[error("resume error: {0}")]
    Resume(ErrorInfo),
    /// Read or write failure against the checkpoint target.
    #[error("persistence error: {0}")]
    Persistence(ErrorInfo),
    /// Propagation or energy evaluation failure raised by the physics collaborator.
    #[error("physics evaluation error: {0}")]
    Physics(ErrorInfo),
    /// Collective communication failure between workers.
    #[error("communication error: {0}")]
    Communication(ErrorInfo),
    /// Serialization and schema errors.
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

impl RepexError {
    /// Shorthand for a [`RepexError::Configuration`] error.
    pub fn configuration(code: &str, message: impl Into<String>) -> Self {
        RepexError::Configuration(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`RepexError::Resume`] error.
    pub fn resume(code: &str, message: impl Into<String>) -> Self {
        RepexError::Resume(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`RepexError::Persistence`] error.
    pub fn persistence(code: &str, message: impl Into<String>) -> Self {
        RepexError::Persistence(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`RepexError::Physics`] error.
    pub fn physics(code: &str, message: impl Into<String>) -> Self {
        RepexError::Physics(ErrorInfo::new(code, message))
    }

    /// Shorthand for a [`RepexError::Communication`] error.
    pub fn communication(code: &str, message: impl Into<String>) -> Self {
        RepexError::Communication(ErrorInfo::new(code, message))
    }

    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            RepexError::Configuration(info)
            | RepexError::Resume(info)
            | RepexError::Persistence(info)
            | RepexError::Physics(info)
            | RepexError::Communication(info)
            | RepexError::Serde(info) => info,
        }
    }

    /// Returns the error with an additional context entry.
    pub fn with_context(self, key: impl Into<String>, value: impl ToString) -> Self {
        match self {
            RepexError::Configuration(info) => {
                RepexError::Configuration(info.with_context(key, value))
            }
            RepexError::Resume(info) => RepexError::Resume(info.with_context(key, value)),
            RepexError::Persistence(info) => RepexError::Persistence(info.with_context(key, value)),
            RepexError::Physics(info) => RepexError::Physics(info.with_context(key, value)),
            RepexError::Communication(info) => {
                RepexError::Communication(info.with_context(key, value))
            }
            RepexError::Serde(info) => RepexError::Serde(info.with_context(key, value)),
        }
    }

    /// Returns the stable family name of the error.
    pub fn family(&self) -> &'static str {
        match self {
            RepexError::Configuration(_) => "configuration",
            RepexError::Resume(_) => "resume",
            RepexError::Persistence(_) => "persistence",
            RepexError::Physics(_) => "physics",
            RepexError::Communication(_) => "communication",
            RepexError::Serde(_) => "serde",
        }
    }
}
