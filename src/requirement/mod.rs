// src/requirement/mod.rs

//! Requirement model
//!
//! A [`Requirement`] is a package name plus whatever narrows it: a version
//! specifier set, requested extras, an environment marker, or a direct link
//! to a source. Everything above this module identifies packages by their
//! normalized name (the identity key), so two requirements with the same key
//! refer to the same package no matter how their specifiers differ.

mod marker;

pub use marker::{MarkerEnvironment, MarkerOperator, MarkerTree, MarkerValue};

use crate::error::{Error, Result};
use crate::hash::ArtifactHash;
use crate::version::{self, Version, VersionSpecifiers};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static NAME_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").unwrap());

static REQUIREMENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<rest>.*)$",
    )
    .unwrap()
});

static DIRECT_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?\s*(?:\[[^\]]*\])?\s*@").unwrap()
});

static EGG_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[#&]egg=(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)(?:\[(?P<extras>[^\]]*)\])?").unwrap()
});

/// File name suffixes of installable archives
const ARTIFACT_SUFFIXES: &[&str] = &[".whl", ".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".zip", ".tar"];

/// URL scheme prefixes of version control links
const VCS_PREFIXES: &[&str] = &["git+", "hg+", "svn+", "bzr+"];

/// Normalize a package name (PEP 503)
///
/// Runs of `-`, `_` and `.` collapse to a single `-` and the result is
/// lower-cased, so `Foo_Bar`, `foo.bar` and `foo--bar` all become `foo-bar`.
pub fn normalize_name(name: &str) -> String {
    NAME_SEPARATORS.replace_all(name.trim(), "-").to_lowercase()
}

/// A direct reference to a package source
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    url: String,
}

impl Link {
    /// Create a link from a URL or filesystem path
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The full link, including any fragment
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The link without its `#fragment`
    pub fn url_without_fragment(&self) -> &str {
        self.url.split('#').next().unwrap_or(&self.url)
    }

    /// Whether the link points at a local path
    pub fn is_file(&self) -> bool {
        let url = self.url_without_fragment();
        url.starts_with("file:") || url.starts_with('/') || url.starts_with('.') || url.starts_with('~')
    }

    /// Whether the link points at a version control repository
    pub fn is_vcs(&self) -> bool {
        VCS_PREFIXES.iter().any(|prefix| self.url.starts_with(prefix))
    }

    /// Whether the link points at a single downloadable archive
    pub fn is_artifact(&self) -> bool {
        if self.is_vcs() {
            return false;
        }
        let url = self.url_without_fragment().to_lowercase();
        ARTIFACT_SUFFIXES.iter().any(|suffix| url.ends_with(suffix))
    }

    /// Filesystem path for local links
    pub fn local_path(&self) -> Option<std::path::PathBuf> {
        let url = self.url_without_fragment();
        if url.starts_with("file:") {
            url::Url::parse(url).ok()?.to_file_path().ok()
        } else if self.is_file() {
            Some(std::path::PathBuf::from(url))
        } else {
            None
        }
    }

    fn egg(&self) -> Option<(String, BTreeSet<String>)> {
        let caps = EGG_FRAGMENT.captures(&self.url)?;
        let name = caps.name("name")?.as_str().to_string();
        let extras = caps
            .name("extras")
            .map(|m| parse_extras(m.as_str()))
            .unwrap_or_default();
        Some((name, extras))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn parse_extras(s: &str) -> BTreeSet<String> {
    s.split(',')
        .map(normalize_name)
        .filter(|extra| !extra.is_empty())
        .collect()
}

/// A declared package requirement
#[derive(Debug, Clone)]
pub struct Requirement {
    /// Project name as written
    pub name: String,
    /// Version constraints; empty means any version
    pub specifiers: VersionSpecifiers,
    /// Requested extras, normalized and sorted
    pub extras: BTreeSet<String>,
    /// Environment marker deciding whether the requirement applies
    pub marker: Option<MarkerTree>,
    /// Direct source link (URL, VCS URL, or local path)
    pub link: Option<Link>,
    /// Installed in development mode from `link`
    pub editable: bool,
    /// Narrows versions without requesting the package itself
    pub constraint: bool,
    /// Known artifact hashes (`algorithm:hex`) attached to a pin
    pub hashes: BTreeSet<String>,
    /// Where this requirement came from, for diagnostics
    pub comes_from: Option<String>,
}

impl Requirement {
    /// Create an unconstrained requirement for a package name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specifiers: version::empty_specifiers(),
            extras: BTreeSet::new(),
            marker: None,
            link: None,
            editable: false,
            constraint: false,
            hashes: BTreeSet::new(),
            comes_from: None,
        }
    }

    /// Create a requirement pinned to exactly one version
    ///
    /// Extras are kept sorted so the same pin always renders identically.
    pub fn pinned(
        name: &str,
        version: &Version,
        extras: &BTreeSet<String>,
        constraint: bool,
    ) -> Result<Self> {
        let mut req = Self::new(name);
        req.specifiers = version::exact_specifiers(version)?;
        req.extras = extras.clone();
        req.constraint = constraint;
        Ok(req)
    }

    /// Parse a requirement line
    ///
    /// Accepted forms:
    /// - `name[extra,...] <specifiers> ; <marker>`
    /// - `name[extra,...] @ <url> ; <marker>`
    /// - `-e <link>#egg=name` / `--editable <link>#egg=name`
    /// - `<url or path>#egg=name[extra,...]`
    ///
    /// Trailing `--hash=algorithm:hex` options attach known hashes and a
    /// `#` preceded by whitespace starts a comment.
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRequirement {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let without_comment = strip_comment(line);
        let (body, hashes) = split_hash_options(without_comment, line)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(invalid("empty requirement"));
        }

        let (body, editable) = if let Some(rest) = body.strip_prefix("--editable") {
            (rest.trim_start_matches('=').trim(), true)
        } else if let Some(rest) = body.strip_prefix("-e") {
            (rest.trim(), true)
        } else {
            (body, false)
        };

        let bare_link = looks_like_link(body) && !DIRECT_REFERENCE.is_match(body);
        let mut req = if editable || bare_link {
            Self::parse_link(body, line)?
        } else {
            Self::parse_named(body, line)?
        };

        req.editable = editable;
        req.hashes = hashes;
        Ok(req)
    }

    /// Parse a requirement that is known to be editable
    pub fn parse_editable(link: &str) -> Result<Self> {
        Self::parse(&format!("-e {}", link))
    }

    fn parse_named(body: &str, line: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidRequirement {
            line: line.to_string(),
            reason,
        };

        let (spec_part, marker) = split_marker(body);
        let caps = REQUIREMENT_LINE
            .captures(spec_part.trim())
            .ok_or_else(|| invalid("expected a package name".to_string()))?;

        let mut req = Self::new(&caps["name"]);
        if let Some(extras) = caps.name("extras") {
            req.extras = parse_extras(extras.as_str());
        }

        let rest = caps.name("rest").map(|m| m.as_str().trim()).unwrap_or("");
        if let Some(url) = rest.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() {
                return Err(invalid("missing URL after '@'".to_string()));
            }
            req.link = Some(Link::new(url));
        } else {
            let rest = rest.trim_start_matches('(').trim_end_matches(')');
            req.specifiers = version::parse_specifiers(rest).map_err(|e| invalid(e.to_string()))?;
        }

        if let Some(marker) = marker {
            req.marker = Some(MarkerTree::parse(marker)?);
        }
        Ok(req)
    }

    fn parse_link(body: &str, line: &str) -> Result<Self> {
        let (link_part, marker) = split_marker(body);
        let link = Link::new(link_part.trim());
        let (name, extras) = link.egg().ok_or_else(|| Error::InvalidRequirement {
            line: line.to_string(),
            reason: "direct links must name their package with #egg=<name>".to_string(),
        })?;

        let mut req = Self::new(name);
        req.extras = extras;
        req.link = Some(link);
        if let Some(marker) = marker {
            req.marker = Some(MarkerTree::parse(marker)?);
        }
        Ok(req)
    }

    /// The identity key: the normalized name
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// The pinned version, even for editable requirements
    pub fn version(&self) -> Option<Version> {
        version::pinned_version(&self.specifiers)
    }

    /// The pinned version of a non-editable requirement
    pub fn pinned_version(&self) -> Option<Version> {
        if self.editable {
            return None;
        }
        self.version()
    }

    /// Whether the requirement is narrowed to exactly one version
    pub fn is_pinned(&self) -> bool {
        self.pinned_version().is_some()
    }

    /// Whether the requirement points at a version control link
    pub fn is_vcs_link(&self) -> bool {
        self.link.as_ref().is_some_and(|link| !link.is_artifact())
    }

    /// Whether the requirement carries a direct source link
    pub fn is_direct(&self) -> bool {
        self.link.is_some()
    }

    /// Whether this requirement may be persisted as part of a closure
    pub fn is_closure_member(&self) -> bool {
        self.is_pinned() || self.is_direct()
    }

    /// Whether the marker (if any) applies to the environment
    pub fn match_markers(&self, env: &MarkerEnvironment) -> bool {
        self.marker.as_ref().is_none_or(|marker| marker.evaluate(env))
    }

    /// Extras rendered as `[a,b]`, or empty
    pub fn extras_string(&self) -> String {
        if self.extras.is_empty() {
            String::new()
        } else {
            format!(
                "[{}]",
                self.extras.iter().cloned().collect::<Vec<_>>().join(",")
            )
        }
    }

    /// Human readable specifier, `<any>` when unconstrained
    pub fn format_specifier(&self) -> String {
        version::format_specifiers(&self.specifiers)
    }

    /// Pin a copy of this requirement to `version`, keeping extras and flags
    pub fn with_version(&self, name: &str, version: &Version) -> Result<Self> {
        let mut pinned = Self::pinned(name, version, &self.extras, self.constraint)?;
        pinned.marker = self.marker.clone();
        pinned.comes_from = self.comes_from.clone();
        Ok(pinned)
    }

    /// Set the origin used in diagnostics
    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.comes_from = Some(source.into());
        self
    }

    /// Render the requirement with its origin, for error messages
    pub fn describe(&self) -> String {
        match &self.comes_from {
            Some(source) => format!("{} (from {})", self, source),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            Some(link) if self.editable => write!(f, "-e {}", link)?,
            Some(link) if link.egg().is_some() => write!(f, "{}", link)?,
            Some(link) => write!(
                f,
                "{}{} @ {}",
                self.name.to_lowercase(),
                self.extras_string(),
                link
            )?,
            None => {
                let specs: Vec<String> = self.specifiers.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "{}{}{}",
                    self.name.to_lowercase(),
                    self.extras_string(),
                    specs.join(",")
                )?
            }
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}

fn looks_like_link(body: &str) -> bool {
    body.contains("://")
        || body.starts_with("file:")
        || body.starts_with('.')
        || body.starts_with('/')
        || body.starts_with('~')
        || VCS_PREFIXES.iter().any(|prefix| body.starts_with(prefix))
}

fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

fn split_hash_options<'a>(body: &'a str, line: &str) -> Result<(&'a str, BTreeSet<String>)> {
    let mut hashes = BTreeSet::new();
    let Some(start) = body.find("--hash") else {
        return Ok((body, hashes));
    };

    let options = &body[start..];
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        let value = if let Some(value) = token.strip_prefix("--hash=") {
            value
        } else if token == "--hash" {
            tokens.next().unwrap_or("")
        } else if token == "\\" {
            continue;
        } else {
            return Err(Error::InvalidRequirement {
                line: line.to_string(),
                reason: format!("unexpected option '{}'", token),
            });
        };
        let hash = ArtifactHash::parse(value).map_err(|e| Error::InvalidRequirement {
            line: line.to_string(),
            reason: e.to_string(),
        })?;
        hashes.insert(hash.to_string());
    }

    Ok((&body[..start], hashes))
}

fn split_marker(body: &str) -> (&str, Option<&str>) {
    match body.find(';') {
        Some(pos) => {
            let marker = body[pos + 1..].trim();
            (&body[..pos], (!marker.is_empty()).then_some(marker))
        }
        None => (body, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("hello"), "hello");
        assert_eq!(normalize_name("Foo_Bar"), "foo-bar");
        assert_eq!(normalize_name("foo-bar"), "foo-bar");
        assert_eq!(normalize_name("foo.bar--ding__dong"), "foo-bar-ding-dong");
    }

    #[test]
    fn test_normalize_name_idempotent() {
        for name in ["Foo_Bar", "a.b.c", "X--Y", "zope.interface", "ruamel.yaml.clib"] {
            let once = normalize_name(name);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn test_parse_simple() {
        let req = Requirement::parse("Django>=1.8,<2.0").unwrap();
        assert_eq!(req.name, "Django");
        assert_eq!(req.key(), "django");
        assert!(!req.is_pinned());
        assert_eq!(req.to_string(), "django>=1.8,<2.0");
    }

    #[test]
    fn test_parse_extras_and_marker() {
        let req = Requirement::parse("requests[socks,Security]==2.31.0 ; python_version >= '3.7'")
            .unwrap();
        assert_eq!(
            req.extras.iter().cloned().collect::<Vec<_>>(),
            vec!["security".to_string(), "socks".to_string()]
        );
        assert_eq!(req.pinned_version().unwrap().to_string(), "2.31.0");
        assert!(req.marker.is_some());
        assert_eq!(
            req.to_string(),
            "requests[security,socks]==2.31.0 ; python_version >= \"3.7\""
        );
    }

    #[test]
    fn test_parse_editable() {
        let req = Requirement::parse("-e git+https://github.com/org/proj.git#egg=proj").unwrap();
        assert!(req.editable);
        assert!(req.is_vcs_link());
        assert_eq!(req.key(), "proj");
        assert!(!req.is_pinned());
        assert_eq!(req.to_string(), "-e git+https://github.com/org/proj.git#egg=proj");
    }

    #[test]
    fn test_parse_link_requires_egg() {
        let err = Requirement::parse("https://example.com/pkg-1.0.tar.gz").unwrap_err();
        assert!(matches!(err, Error::InvalidRequirement { .. }));

        let req = Requirement::parse("https://example.com/pkg-1.0.tar.gz#egg=pkg").unwrap();
        assert!(req.link.as_ref().unwrap().is_artifact());
        assert!(!req.is_vcs_link());
    }

    #[test]
    fn test_parse_direct_reference() {
        let req = Requirement::parse("pkg[extra] @ https://example.com/pkg-1.0-py3-none-any.whl")
            .unwrap();
        assert_eq!(req.key(), "pkg");
        assert!(req.is_direct());
        assert!(!req.editable);
        assert!(req.link.as_ref().unwrap().is_artifact());
        assert_eq!(
            req.to_string(),
            "pkg[extra] @ https://example.com/pkg-1.0-py3-none-any.whl"
        );
    }

    #[test]
    fn test_direct_reference_round_trips() {
        for line in [
            "foo @ file:///tmp/foo-1.0-py3-none-any.whl",
            "pkg[extra] @ https://example.com/pkg-1.0-py3-none-any.whl ; python_version >= \"3.8\"",
            "https://example.com/pkg-1.0.tar.gz#egg=pkg",
        ] {
            let req = Requirement::parse(line).unwrap();
            assert_eq!(req.to_string(), line);
            let again = Requirement::parse(&req.to_string()).unwrap();
            assert_eq!(again.key(), req.key());
            assert_eq!(again.link, req.link);
        }

        let local = Requirement::parse("foo @ file:///tmp/foo-1.0-py3-none-any.whl").unwrap();
        assert_eq!(local.key(), "foo");
        assert!(local.link.as_ref().unwrap().is_file());
    }

    #[test]
    fn test_parse_hashes_and_comment() {
        let upper = "A".repeat(64);
        let lower = "b".repeat(64);
        let req = Requirement::parse(&format!(
            "six==1.16.0 --hash=sha256:{upper} --hash=SHA256:{lower}  # pinned for py2"
        ))
        .unwrap();
        assert_eq!(req.hashes.len(), 2);
        assert!(req.hashes.contains(&format!("sha256:{}", "a".repeat(64))));
        assert!(req.hashes.contains(&format!("sha256:{lower}")));
        assert_eq!(req.to_string(), "six==1.16.0");
    }

    #[test]
    fn test_parse_rejects_malformed_hashes() {
        for option in ["--hash=sha256:abcd", "--hash=md5:abcd", "--hash=nocolon"] {
            match Requirement::parse(&format!("six==1.16.0 {option}")).unwrap_err() {
                Error::InvalidRequirement { line, .. } => assert!(line.contains(option)),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Requirement::parse("").is_err());
        assert!(Requirement::parse("   # only a comment").is_err());
        assert!(Requirement::parse("foo>=>1").is_err());
        assert!(Requirement::parse("foo==1.0 --hash=nocolon").is_err());
    }

    #[test]
    fn test_pinned_constructor_sorts_extras() {
        let extras: BTreeSet<String> = ["b".to_string(), "a".to_string()].into_iter().collect();
        let version = version::parse_version("1.2.0").unwrap();
        let req = Requirement::pinned("LibA", &version, &extras, false).unwrap();
        assert_eq!(req.to_string(), "liba[a,b]==1.2.0");
        assert!(req.is_pinned());
    }

    #[test]
    fn test_editable_is_never_pinned() {
        let mut req = Requirement::parse("-e ./src/proj#egg=proj").unwrap();
        req.specifiers = version::parse_specifiers("==1.0").unwrap();
        assert!(req.version().is_some());
        assert!(req.pinned_version().is_none());
        assert!(req.link.as_ref().unwrap().is_file());
    }

    #[test]
    fn test_match_markers() {
        let req = Requirement::parse("pywin32==306 ; sys_platform == 'win32'").unwrap();
        let linux = MarkerEnvironment::new().with("sys_platform", "linux");
        assert!(!req.match_markers(&linux));
        assert!(Requirement::parse("six").unwrap().match_markers(&linux));
    }
}
