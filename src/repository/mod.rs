// src/repository/mod.rs

//! Package repositories
//!
//! A [`Repository`] answers the three questions the resolver asks about a
//! package: which concrete version best matches a requirement, what that
//! version depends on, and which artifact hashes belong to it. Two
//! implementations are provided and compose by wrapping:
//!
//! - [`RemoteIndexRepository`] talks to a package index through the
//!   [`PackageIndex`] boundary and memoizes answers for the process
//! - [`LocalOverrideRepository`] keeps existing pins stable and delegates
//!   everything else to the repository it wraps

mod index;
mod local;
mod remote;

pub use index::{JsonIndexClient, PackageIndex};
pub use local::LocalOverrideRepository;
pub use remote::RemoteIndexRepository;

use crate::error::{Error, Result};
use crate::requirement::Requirement;
use crate::version::Version;
use std::collections::BTreeSet;

/// A concrete version of a package known to exist in an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Project name as the index spells it
    pub name: String,
    pub version: Version,
    /// URL or path of the artifact providing this version
    pub location: String,
}

impl Candidate {
    pub fn new(name: impl Into<String>, version: Version, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            location: location.into(),
        }
    }

    /// Whether the artifact is a prebuilt wheel
    pub fn is_wheel(&self) -> bool {
        self.location
            .split(['#', '?'])
            .next()
            .is_some_and(|path| path.ends_with(".whl"))
    }
}

impl std::fmt::Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Capability interface the resolver works against
pub trait Repository: Send + Sync {
    /// Return the pinned requirement that best satisfies `req`
    ///
    /// Editable and direct-link requirements are their own best match.
    fn find_best_match(&self, req: &Requirement, prereleases: bool) -> Result<Requirement>;

    /// Declared dependencies of a pinned or direct-link requirement
    ///
    /// Markers are evaluated and stripped. This may download or build the
    /// package, so callers check the dependency cache first.
    fn get_dependencies(&self, req: &Requirement) -> Result<Vec<Requirement>>;

    /// `algorithm:hex` hashes of every artifact of a pinned requirement
    fn get_hashes(&self, req: &Requirement) -> Result<BTreeSet<String>>;

    /// Forget anything memoized in memory
    fn clear_caches(&self) {}
}

/// Reject requirements that have no definite set of artifacts to hash
pub fn check_is_hashable(req: &Requirement) -> Result<()> {
    if req.is_pinned() || req.editable {
        return Ok(());
    }
    match &req.link {
        Some(link) if link.is_artifact() => Ok(()),
        Some(_) => Err(Error::NotHashable {
            requirement: req.to_string(),
            reason: "version control and directory links have no single artifact".to_string(),
        }),
        None => Err(Error::NotHashable {
            requirement: req.to_string(),
            reason: "requirement is not pinned to one version".to_string(),
        }),
    }
}
