//! Transient-vs-fatal classification of failures
//!
//! The retry engine only asks "should this be retried?". How that is
//! decided lives here, behind [`Classifier`], so the free-text heuristics
//! for external tools can be swapped for structured error codes without
//! touching the engine.
//!
//! ## Substring heuristic
//!
//! External tools report failures as text. A failure is transient when its
//! output contains one of a fixed list of markers, compared
//! case-insensitively. This is fragile: an unrelated message that happens to
//! contain "timeout" is retried too.

use spotwise_core::{FailureKind, SpotwiseError};
use std::fmt::Display;

/// Decides whether a failure is worth another attempt
pub trait Classifier<E: ?Sized>: Send + Sync {
    /// Transient failures are retried, fatal ones are returned at once
    fn classify(&self, error: &E) -> FailureKind;
}

impl<E: ?Sized, F> Classifier<E> for F
where
    F: Fn(&E) -> FailureKind + Send + Sync,
{
    fn classify(&self, error: &E) -> FailureKind {
        self(error)
    }
}

/// Retries every failure
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysTransient;

impl<E: ?Sized> Classifier<E> for AlwaysTransient {
    fn classify(&self, _error: &E) -> FailureKind {
        FailureKind::Transient
    }
}

/// Uses the error's own [`SpotwiseError::failure_kind`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ByErrorKind;

impl Classifier<SpotwiseError> for ByErrorKind {
    fn classify(&self, error: &SpotwiseError) -> FailureKind {
        error.failure_kind()
    }
}

/// Marks a failure transient when its text contains a known marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstringClassifier {
    patterns: Vec<String>,
}

const CLUSTER_CLIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "timed out",
    "leader changed",
    "server unavailable",
    "the server is currently unable to handle the request",
    "connection reset by peer",
    "too many requests",
];

const BACKUP_TOOL_PATTERNS: &[&str] = &[
    "backup storage location unavailable",
    "backupstoragelocation is unavailable",
];

const PROVISIONING_ENGINE_PATTERNS: &[&str] = &[
    "throttling",
    "rate exceeded",
    "requestlimitexceeded",
    "internal error",
    "internalerror",
    "service unavailable",
    "connection reset",
    "timeout",
];

impl SubstringClassifier {
    /// Create from marker strings (matched case-insensitively)
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Markers for the cluster client (API server / etcd hiccups)
    pub fn cluster_client() -> Self {
        Self::new(CLUSTER_CLIENT_PATTERNS)
    }

    /// Markers for the cluster backup tool
    pub fn backup_tool() -> Self {
        Self::new(CLUSTER_CLIENT_PATTERNS.iter().chain(BACKUP_TOOL_PATTERNS))
    }

    /// Markers for the infrastructure provisioning engine (cloud API throttling)
    pub fn provisioning_engine() -> Self {
        Self::new(PROVISIONING_ENGINE_PATTERNS)
    }

    /// Add a marker
    pub fn with_pattern(mut self, pattern: impl AsRef<str>) -> Self {
        let pattern = pattern.as_ref().to_lowercase();
        if !pattern.is_empty() {
            self.patterns.push(pattern);
        }
        self
    }

    /// Configured markers, lowercased
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Classify raw process output
    pub fn classify_output(&self, output: &str) -> FailureKind {
        let output = output.to_lowercase();
        FailureKind::from_transient(self.patterns.iter().any(|p| output.contains(p.as_str())))
    }
}

impl<E: Display + ?Sized> Classifier<E> for SubstringClassifier {
    fn classify(&self, error: &E) -> FailureKind {
        self.classify_output(&error.to_string())
    }
}
