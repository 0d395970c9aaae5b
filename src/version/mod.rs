// src/version/mod.rs

//! Version handling and specifier matching for package requirements
//!
//! Versions and specifiers follow PEP 440 and are parsed by `pep440_rs`.
//! This module adds the pin-oriented helpers the resolver and the cache
//! need on top of it: extracting the single pinned version from a
//! specifier set, combining specifier sets, and filtering candidate
//! versions with the pre-release policy applied.

use crate::error::{Error, Result};
use std::str::FromStr;

pub use pep440_rs::{Operator, Version, VersionSpecifier, VersionSpecifiers};

/// Parse a version string
pub fn parse_version(s: &str) -> Result<Version> {
    Version::from_str(s.trim())
        .map_err(|e| Error::ParseError(format!("Invalid version '{}': {}", s, e)))
}

/// Parse a comma separated specifier set
///
/// An empty string is the unconstrained specifier set.
pub fn parse_specifiers(s: &str) -> Result<VersionSpecifiers> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(empty_specifiers());
    }
    VersionSpecifiers::from_str(s)
        .map_err(|e| Error::ParseError(format!("Invalid version specifier '{}': {}", s, e)))
}

/// The specifier set that allows every version
pub fn empty_specifiers() -> VersionSpecifiers {
    Vec::<VersionSpecifier>::new().into_iter().collect()
}

/// Build the `==version` specifier set
pub fn exact_specifiers(version: &Version) -> Result<VersionSpecifiers> {
    parse_specifiers(&format!("=={}", version))
}

/// Whether a single specifier pins exactly one version
pub fn is_exact(specifier: &VersionSpecifier) -> bool {
    matches!(specifier.operator(), Operator::Equal | Operator::ExactEqual)
}

/// Get the pinned version of a specifier set, if it has one
///
/// A set is pinned when it contains an `==` (or `===`) specifier with a
/// non-wildcard version that also satisfies every other specifier in the
/// set. `>=1.4,==1.8` is pinned to 1.8; `==1.8,>=1.9` and `==1.8.*` are not.
pub fn pinned_version(specifiers: &VersionSpecifiers) -> Option<Version> {
    specifiers
        .iter()
        .filter(|spec| is_exact(spec))
        .map(|spec| spec.version().clone())
        .find(|version| specifiers.iter().all(|spec| spec.contains(version)))
}

/// Combine two specifier sets into one that requires both
pub fn combine(left: &VersionSpecifiers, right: &VersionSpecifiers) -> VersionSpecifiers {
    let mut seen: Vec<String> = Vec::new();
    let mut combined = Vec::new();
    for spec in left.iter().chain(right.iter()) {
        let text = spec.to_string();
        if !seen.contains(&text) {
            seen.push(text);
            combined.push(spec.clone());
        }
    }
    combined.into_iter().collect()
}

/// Check whether a version is allowed by a specifier set
///
/// Pre-release versions are only allowed when `prereleases` is set or one of
/// the specifiers itself names a pre-release.
pub fn allows(specifiers: &VersionSpecifiers, version: &Version, prereleases: bool) -> bool {
    if version.any_prerelease() && !prereleases && !mentions_prerelease(specifiers) {
        return false;
    }
    specifiers.contains(version)
}

fn mentions_prerelease(specifiers: &VersionSpecifiers) -> bool {
    specifiers.iter().any(|spec| spec.version().any_prerelease())
}

/// Filter versions through a specifier set
///
/// If pre-releases are not allowed and nothing but pre-releases match, the
/// matching pre-releases are returned instead of an empty list.
pub fn filter_versions<'a, I>(
    specifiers: &VersionSpecifiers,
    versions: I,
    prereleases: bool,
) -> Vec<&'a Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    let matching: Vec<&Version> = versions
        .into_iter()
        .filter(|version| specifiers.contains(version))
        .collect();

    let allowed: Vec<&Version> = matching
        .iter()
        .copied()
        .filter(|version| allows(specifiers, version, prereleases))
        .collect();

    if allowed.is_empty() { matching } else { allowed }
}

/// Format a specifier set for display, sorted by version, or `<any>`
pub fn format_specifiers(specifiers: &VersionSpecifiers) -> String {
    let mut specs: Vec<&VersionSpecifier> = specifiers.iter().collect();
    if specs.is_empty() {
        return "<any>".to_string();
    }
    specs.sort_by(|a, b| a.version().cmp(b.version()));
    specs
        .iter()
        .map(|spec| spec.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
