// src/repository/remote.rs

//! Repository backed by a package index
//!
//! Candidate listings and dependency lists are memoized per instance. The
//! memo is separate from the persistent dependency cache and lives only as
//! long as the repository does.

use super::{Candidate, PackageIndex, Repository, check_is_hashable};
use crate::error::{Error, Result};
use crate::hash::{FAVORITE_HASH, hash_reader};
use crate::logs::collect_logs;
use crate::requirement::{MarkerEnvironment, Requirement};
use crate::version::{self, Version};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Repository answering from a [`PackageIndex`]
pub struct RemoteIndexRepository<I: PackageIndex> {
    index: I,
    environment: MarkerEnvironment,
    candidates: Mutex<HashMap<String, Vec<Candidate>>>,
    dependencies: Mutex<HashMap<String, Vec<Requirement>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<I: PackageIndex> RemoteIndexRepository<I> {
    /// Create a repository evaluating dependency markers against `environment`
    pub fn new(index: I, environment: MarkerEnvironment) -> Self {
        Self {
            index,
            environment,
            candidates: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    /// All candidates of a project, fetched once per instance
    pub fn find_all_candidates(&self, name: &str) -> Result<Vec<Candidate>> {
        let key = crate::requirement::normalize_name(name);
        if let Some(cached) = lock(&self.candidates).get(&key) {
            return Ok(cached.clone());
        }

        let candidates = self.index.find_all_candidates(&key)?;
        lock(&self.candidates).insert(key, candidates.clone());
        Ok(candidates)
    }

    fn hash_location(&self, location: &str) -> Result<String> {
        let mut reader = self.index.open_artifact(location)?;
        let hash = hash_reader(FAVORITE_HASH, &mut reader)
            .map_err(|e| Error::IoError(format!("Failed to hash {location}: {e}")))?;
        Ok(hash.to_string())
    }

    fn parse_dependencies(&self, req: &Requirement, raw: Vec<String>) -> Result<Vec<Requirement>> {
        let extras: Vec<String> = req.extras.iter().cloned().collect();
        let mut dependencies = Vec::new();
        for line in raw {
            let mut dependency = Requirement::parse(&line)?;
            if let Some(marker) = dependency.marker.take()
                && !marker.evaluate_with_extras(&self.environment, &extras)
            {
                debug!("Skipping {} for {}: marker does not apply", line, req);
                continue;
            }
            dependencies.push(dependency.from_source(req.to_string()));
        }
        Ok(dependencies)
    }
}

impl<I: PackageIndex> Repository for RemoteIndexRepository<I> {
    fn find_best_match(&self, req: &Requirement, prereleases: bool) -> Result<Requirement> {
        if req.editable || req.link.is_some() {
            return Ok(req.clone());
        }

        let all_candidates = self.find_all_candidates(&req.name)?;
        let matching_versions: Vec<&Version> = version::filter_versions(
            &req.specifiers,
            all_candidates.iter().map(|c| &c.version),
            prereleases,
        );

        let best = all_candidates
            .iter()
            .filter(|c| matching_versions.contains(&&c.version))
            .max_by(|a, b| {
                a.version
                    .cmp(&b.version)
                    .then_with(|| a.is_wheel().cmp(&b.is_wheel()))
            });

        let Some(best) = best else {
            let mut tried: Vec<String> = all_candidates.iter().map(|c| c.to_string()).collect();
            tried.dedup();
            return Err(Error::NoCandidateFound {
                requirement: req.to_string(),
                candidates: tried,
            });
        };

        debug!("Best match for {} is {}", req, best);
        req.with_version(&best.name, &best.version)
    }

    fn get_dependencies(&self, req: &Requirement) -> Result<Vec<Requirement>> {
        if !req.is_pinned() && !req.is_direct() {
            return Err(Error::UnsupportedConstraint {
                requirement: req.to_string(),
                reason: "expected a pinned or direct-link requirement".to_string(),
            });
        }

        let memo_key = req.to_string();
        if let Some(cached) = lock(&self.dependencies).get(&memo_key) {
            return Ok(cached.clone());
        }

        let (result, log_lines) = collect_logs(|| {
            self.index
                .fetch_dependencies(req)
                .and_then(|raw| self.parse_dependencies(req, raw))
        });

        let dependencies = match result {
            Ok(dependencies) => {
                for line in &log_lines {
                    line.replay();
                }
                dependencies
            }
            Err(e) => {
                return Err(Error::DependencyResolutionFailed {
                    requirement: req.to_string(),
                    reason: e.to_string(),
                    log_lines: log_lines.iter().map(|line| line.to_string()).collect(),
                });
            }
        };

        lock(&self.dependencies).insert(memo_key, dependencies.clone());
        Ok(dependencies)
    }

    fn get_hashes(&self, req: &Requirement) -> Result<BTreeSet<String>> {
        if req.editable {
            return Ok(BTreeSet::new());
        }
        check_is_hashable(req)?;

        if let Some(link) = &req.link {
            return Ok(BTreeSet::from([self.hash_location(link.url())?]));
        }

        let pinned = req.pinned_version().ok_or_else(|| Error::NotHashable {
            requirement: req.to_string(),
            reason: "requirement is not pinned to one version".to_string(),
        })?;
        let candidates = self.find_all_candidates(&req.name)?;
        let matching: Vec<&Candidate> = candidates.iter().filter(|c| c.version == pinned).collect();
        if matching.is_empty() {
            return Err(Error::NoCandidateFound {
                requirement: req.to_string(),
                candidates: candidates.iter().map(|c| c.to_string()).collect(),
            });
        }

        matching
            .par_iter()
            .map(|candidate| self.hash_location(&candidate.location))
            .collect()
    }

    fn clear_caches(&self) {
        lock(&self.candidates).clear();
        lock(&self.dependencies).clear();
    }
}
