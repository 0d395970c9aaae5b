// src/error.rs

//! Error types shared across the crate
//!
//! Every failure the resolver, cache, repositories, and sync differ can
//! produce is a distinct variant so callers can match on the kind and render
//! their own diagnostics.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by pinset
#[derive(Debug, Error)]
pub enum Error {
    /// A requirement line could not be parsed
    #[error("Invalid requirement '{line}': {reason}")]
    InvalidRequirement { line: String, reason: String },

    /// A requirement uses a form that cannot be resolved or synced
    #[error("Unsupported requirement {requirement}: {reason}")]
    UnsupportedConstraint { requirement: String, reason: String },

    /// Two requirements pin the same package to different exact versions
    #[error("Conflicting pins for the same package: {first} and {second}")]
    ConflictingPins { first: String, second: String },

    /// Two requirement files disagree on the same package during sync
    #[error("Incompatible requirements found: {first} and {second}")]
    IncompatibleRequirements { first: String, second: String },

    /// The persisted dependency cache could not be read
    #[error(
        "The dependency cache seems to have been corrupted ({reason}). Inspect, or delete, the following file:\n  {}",
        .path.display()
    )]
    CorruptCache { path: PathBuf, reason: String },

    /// A reverse dependency lookup hit a requirement the cache knows nothing about
    #[error("No cached dependencies for {requirement}")]
    MissingCacheEntry { requirement: String },

    /// No candidate in the index satisfies the requirement
    #[error("Could not find a version that matches {requirement}{}", format_candidates(.candidates))]
    NoCandidateFound {
        requirement: String,
        candidates: Vec<String>,
    },

    /// Fetching or building a package to learn its dependencies failed
    #[error("Failed to get dependencies of {requirement}: {reason}")]
    DependencyResolutionFailed {
        requirement: String,
        reason: String,
        log_lines: Vec<String>,
    },

    /// The resolver hit its round ceiling before reaching a fixed point
    #[error("No stable configuration of concrete packages could be found after {rounds} rounds")]
    DidNotConverge { rounds: usize, frontier: Vec<String> },

    /// Hashes were requested for a requirement that has no single artifact
    #[error("Cannot hash {requirement}: {reason}")]
    NotHashable { requirement: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        " (no versions found)".to_string()
    } else {
        format!(" (tried: {})", candidates.join(", "))
    }
}

impl Error {
    /// Log lines collected while the failing operation ran, if any
    pub fn log_lines(&self) -> &[String] {
        match self {
            Error::DependencyResolutionFailed { log_lines, .. } => log_lines,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidate_lists_versions() {
        let err = Error::NoCandidateFound {
            requirement: "foo>=3.0".to_string(),
            candidates: vec!["foo 1.0".to_string(), "foo 2.0".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Could not find a version that matches foo>=3.0 (tried: foo 1.0, foo 2.0)"
        );
    }

    #[test]
    fn test_corrupt_cache_names_file() {
        let err = Error::CorruptCache {
            path: PathBuf::from("/tmp/depcache-py3.json"),
            reason: "expected value".to_string(),
        };
        assert!(err.to_string().contains("/tmp/depcache-py3.json"));
    }

    #[test]
    fn test_log_lines_only_on_dependency_failures() {
        let err = Error::DependencyResolutionFailed {
            requirement: "foo==1.0".to_string(),
            reason: "build failed".to_string(),
            log_lines: vec!["running setup.py".to_string()],
        };
        assert_eq!(err.log_lines(), ["running setup.py".to_string()]);
        assert!(Error::ParseError("x".to_string()).log_lines().is_empty());
    }
}
