// src/sync/mod.rs

//! Environment sync planning
//!
//! Compares a resolved closure with what is installed and decides what to
//! install and what to remove. Everything here works on in-memory data
//! supplied by the caller; running the package manager is left to them.
//!
//! Packages reachable from a protected root (the tool itself, the package
//! manager, and their dependencies) are never proposed for removal, even
//! when the closure does not mention them.

use crate::error::{Error, Result};
use crate::requirement::{MarkerEnvironment, Requirement, normalize_name};
use crate::version::{Version, format_specifiers};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Protected roots used when the caller does not supply any
pub const PACKAGES_TO_IGNORE: &[&str] = &[
    "-markerlib",
    "pip",
    "pinset",
    "pip-review",
    "pkg-resources",
    "setuptools",
    "wheel",
];

/// A distribution reported by the target environment
#[derive(Debug, Clone)]
pub struct InstalledDistribution {
    pub name: String,
    pub version: Version,
    /// Its own runtime dependencies
    pub requires: Vec<Requirement>,
}

impl InstalledDistribution {
    pub fn new(name: impl Into<String>, version: Version, requires: Vec<Requirement>) -> Self {
        Self {
            name: name.into(),
            version,
            requires,
        }
    }

    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// Index installed distributions by identity key
pub fn index_installed(installed: &[InstalledDistribution]) -> BTreeMap<String, &InstalledDistribution> {
    installed.iter().map(|dist| (dist.key(), dist)).collect()
}

/// Keys of every installed package reachable from `roots`
///
/// Walks breadth first through `requires`, only following an edge when the
/// installed version of the dependency satisfies the declared specifier.
/// Roots that are not installed contribute nothing.
pub fn dependency_tree<'r>(
    installed: &BTreeMap<String, &InstalledDistribution>,
    roots: impl IntoIterator<Item = &'r str>,
) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<&InstalledDistribution> = roots
        .into_iter()
        .filter_map(|root| installed.get(&normalize_name(root)).copied())
        .collect();

    while let Some(dist) = queue.pop_front() {
        if !visited.insert(dist.key()) {
            continue;
        }

        for requirement in &dist.requires {
            let Some(dependency) = installed.get(&requirement.key()).copied() else {
                continue;
            };
            if requirement.specifiers.contains(&dependency.version) {
                queue.push_back(dependency);
            }
        }
    }

    visited
}

/// Keys that sync must leave alone: the dependency trees of `roots`
pub fn dists_to_ignore<'r>(
    installed: &[InstalledDistribution],
    roots: impl IntoIterator<Item = &'r str>,
) -> BTreeSet<String> {
    dependency_tree(&index_installed(installed), roots)
}

/// Collapse requirements into one per identity key
///
/// Without `ignore_conflicts`, two entries for the same key whose specifiers
/// differ are an [`Error::IncompatibleRequirements`]; with it, the last one
/// wins. Unpinned, non-editable links that do not point at an archive are
/// rejected since there is no way to tell what they would install.
pub fn merge(
    requirements: impl IntoIterator<Item = Requirement>,
    ignore_conflicts: bool,
) -> Result<Vec<Requirement>> {
    let mut by_key: BTreeMap<String, Requirement> = BTreeMap::new();

    for req in requirements {
        if req.is_vcs_link() && !req.editable && !req.is_pinned() {
            return Err(Error::UnsupportedConstraint {
                requirement: req.to_string(),
                reason: "non-editable version control links must be pinned to one version"
                    .to_string(),
            });
        }

        let key = req.key();
        if !ignore_conflicts
            && let Some(existing) = by_key.get(&key)
            && format_specifiers(&existing.specifiers) != format_specifiers(&req.specifiers)
        {
            return Err(Error::IncompatibleRequirements {
                first: existing.describe(),
                second: req.describe(),
            });
        }
        by_key.insert(key, req);
    }

    Ok(by_key.into_values().collect())
}

/// What sync should do to the environment
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Requirements to install, by identity key
    pub to_install: BTreeMap<String, Requirement>,
    /// Keys of installed packages to remove
    pub to_uninstall: BTreeSet<String>,
}

impl SyncPlan {
    /// Whether the environment already matches
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_uninstall.is_empty()
    }

    /// Arguments for the package manager's install command, sorted by key
    ///
    /// Editables become `-e <link>` pairs; markers were already evaluated
    /// and are left out.
    pub fn install_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for req in self.to_install.values() {
            match &req.link {
                Some(link) if req.editable => {
                    args.push("-e".to_string());
                    args.push(link.url().to_string());
                }
                _ => {
                    let mut plain = req.clone();
                    plain.marker = None;
                    args.push(plain.to_string());
                }
            }
        }
        args
    }

    /// Arguments for the package manager's uninstall command
    pub fn uninstall_args(&self) -> Vec<String> {
        self.to_uninstall.iter().cloned().collect()
    }
}

/// Plan the changes that make `installed` match `desired`
///
/// An installed package is removed when the closure lacks it or its marker
/// no longer applies, and kept when the closure's specifier accepts the
/// installed version. Desired entries that are not satisfied and whose
/// marker applies are installed. Nothing reachable from `protected_roots`
/// is removed.
pub fn diff<'r>(
    desired: &[Requirement],
    installed: &[InstalledDistribution],
    environment: &MarkerEnvironment,
    protected_roots: impl IntoIterator<Item = &'r str>,
) -> SyncPlan {
    let lookup: BTreeMap<String, &Requirement> =
        desired.iter().map(|req| (req.key(), req)).collect();

    let mut satisfied = BTreeSet::new();
    let mut plan = SyncPlan::default();

    for dist in installed {
        let key = dist.key();
        match lookup.get(&key) {
            Some(req) if req.match_markers(environment) => {
                if req.specifiers.contains(&dist.version) {
                    satisfied.insert(key);
                }
            }
            _ => {
                plan.to_uninstall.insert(key);
            }
        }
    }

    for (key, req) in &lookup {
        if !satisfied.contains(key) && req.match_markers(environment) {
            plan.to_install.insert(key.clone(), (*req).clone());
        }
    }

    let ignored = dists_to_ignore(installed, protected_roots);
    for key in &ignored {
        if plan.to_uninstall.remove(key) {
            debug!("Keeping {}: needed by a protected package", key);
        }
    }

    plan
}
