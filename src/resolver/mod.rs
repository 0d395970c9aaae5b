// src/resolver/mod.rs

//! Fixed-point dependency resolution
//!
//! The resolver turns a set of abstract requirements into a closure of pins.
//! Each round groups every known requirement by identity key, asks the
//! repository for the best match of each group, and collects the dependencies
//! of those matches (from the dependency cache where possible). The
//! dependencies feed the next round. Resolution ends when a round changes
//! neither the best matches nor the dependency set.
//!
//! There is no backtracking: two exact pins that disagree are reported as a
//! conflict instead of searching for another candidate.

use crate::cache::DependencyCache;
use crate::config::ResolverOptions;
use crate::error::{Error, Result};
use crate::repository::Repository;
use crate::requirement::{Requirement, normalize_name};
use crate::version;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Packaging infrastructure kept out of resolved output unless asked for
pub const UNSAFE_PACKAGES: &[&str] = &["setuptools", "distribute", "pip"];

/// Whether `name` is one of [`UNSAFE_PACKAGES`]
pub fn is_unsafe(name: &str) -> bool {
    let key = normalize_name(name);
    UNSAFE_PACKAGES.contains(&key.as_str())
}

/// Result of a successful resolve
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The closure, sorted by identity key
    pub pins: Vec<Requirement>,
    /// Unsafe packages the closure needs but that were held back
    pub unsafe_constraints: Vec<Requirement>,
    /// Rounds it took to reach the fixed point
    pub rounds: usize,
}

/// Iterative resolver over a [`Repository`]
pub struct Resolver<'a, R: Repository + ?Sized> {
    constraints: Vec<Requirement>,
    repository: &'a R,
    cache: &'a mut DependencyCache,
    prereleases: bool,
    allow_unsafe: bool,
    clear_caches: bool,
    jobs: usize,
    their_constraints: Vec<Requirement>,
    previous_best: BTreeSet<String>,
    previous_theirs: BTreeSet<String>,
}

impl<'a, R: Repository + ?Sized> Resolver<'a, R> {
    pub fn new(
        constraints: Vec<Requirement>,
        repository: &'a R,
        cache: &'a mut DependencyCache,
    ) -> Self {
        Self {
            constraints,
            repository,
            cache,
            prereleases: false,
            allow_unsafe: false,
            clear_caches: false,
            jobs: 4,
            their_constraints: Vec::new(),
            previous_best: BTreeSet::new(),
            previous_theirs: BTreeSet::new(),
        }
    }

    /// Create a resolver configured from [`ResolverOptions`]
    pub fn from_options(
        constraints: Vec<Requirement>,
        repository: &'a R,
        cache: &'a mut DependencyCache,
        options: &ResolverOptions,
    ) -> Self {
        Self::new(constraints, repository, cache)
            .prereleases(options.prereleases)
            .allow_unsafe(options.allow_unsafe)
            .jobs(options.jobs)
    }

    pub fn prereleases(mut self, prereleases: bool) -> Self {
        self.prereleases = prereleases;
        self
    }

    /// Keep unsafe packages in the visible closure
    pub fn allow_unsafe(mut self, allow_unsafe: bool) -> Self {
        self.allow_unsafe = allow_unsafe;
        self
    }

    /// Drop the dependency cache and repository memos before resolving
    pub fn clear_caches(mut self, clear_caches: bool) -> Self {
        self.clear_caches = clear_caches;
        self
    }

    /// Worker threads used for per-round fan-out
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    fn pool(&self) -> Result<ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create worker pool: {e}")))
    }

    /// Resolve the constraints into a closure of pins
    ///
    /// Fails with [`Error::ConflictingPins`] before touching the repository
    /// when the constraints themselves pin one package twice, and with
    /// [`Error::DidNotConverge`] when `max_rounds` rounds still change
    /// something.
    pub fn resolve(&mut self, max_rounds: usize) -> Result<Resolution> {
        self.check_constraints()?;

        if self.clear_caches {
            self.cache.clear()?;
            self.repository.clear_caches();
        }

        let pool = self.pool()?;
        self.their_constraints.clear();
        self.previous_best.clear();
        self.previous_theirs.clear();

        for round in 1..=max_rounds {
            let (changed, best_matches) = self.resolve_one_round(&pool)?;
            info!("Round {}: {} packages pinned", round, best_matches.len());
            if !changed {
                return self.finish(best_matches, round);
            }
        }

        let frontier = group_constraints(self.frontier())?
            .iter()
            .map(|req| req.to_string())
            .collect();
        Err(Error::DidNotConverge {
            rounds: max_rounds,
            frontier,
        })
    }

    /// Reject two caller-supplied exact pins of the same package
    fn check_constraints(&self) -> Result<()> {
        group_constraints(self.constraints.iter()).map(|_| ())
    }

    fn frontier(&self) -> impl Iterator<Item = &Requirement> {
        self.constraints.iter().chain(self.their_constraints.iter())
    }

    fn resolve_one_round(&mut self, pool: &ThreadPool) -> Result<(bool, Vec<Requirement>)> {
        let groups = group_constraints(self.frontier())?;
        let wanted: Vec<&Requirement> = groups.iter().filter(|req| !req.constraint).collect();

        let repository = self.repository;
        let prereleases = self.prereleases;
        let best_matches: Vec<Requirement> = pool.install(|| {
            wanted
                .par_iter()
                .map(|req| best_match(repository, req, prereleases))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut theirs = Vec::new();
        let mut misses = Vec::new();
        for best in &best_matches {
            match self.cache.get(best)? {
                Some(cached) => {
                    for line in cached {
                        theirs.push(Requirement::parse(&line)?.from_source(best.to_string()));
                    }
                }
                None => misses.push(best),
            }
        }

        if !misses.is_empty() {
            debug!("Fetching dependencies of {} packages", misses.len());
            let fetched: Vec<(&Requirement, Vec<Requirement>)> = pool.install(|| {
                misses
                    .par_iter()
                    .map(|best| repository.get_dependencies(best).map(|deps| (*best, deps)))
                    .collect::<Result<Vec<_>>>()
            })?;

            self.cache.set_many(fetched.iter().map(|(best, deps)| {
                (*best, deps.iter().map(|dep| dep.to_string()).collect())
            }))?;

            for (best, deps) in fetched {
                theirs.extend(deps.into_iter().map(|dep| dep.from_source(best.to_string())));
            }
        }

        let best_signature: BTreeSet<String> = best_matches.iter().map(|r| r.to_string()).collect();
        let their_signature: BTreeSet<String> = theirs.iter().map(|r| r.to_string()).collect();
        let changed = best_signature != self.previous_best || their_signature != self.previous_theirs;

        if changed {
            for added in best_signature.difference(&self.previous_best) {
                debug!("  pinned {}", added);
            }
        }

        self.previous_best = best_signature;
        self.previous_theirs = their_signature;
        self.their_constraints = theirs;
        Ok((changed, best_matches))
    }

    fn finish(&mut self, best_matches: Vec<Requirement>, rounds: usize) -> Result<Resolution> {
        let mut pins = best_matches;
        pins.sort_by_key(|req| req.key());

        let mut unsafe_constraints = Vec::new();
        if !self.allow_unsafe {
            let reverse = self.cache.reverse_dependencies(&pins)?;
            let (held, visible): (Vec<_>, Vec<_>) = pins.into_iter().partition(|req| {
                let required_by = reverse.get(&req.key());
                is_unsafe(&req.name)
                    || required_by.is_some_and(|by| !by.is_empty() && by.iter().all(|name| is_unsafe(name)))
            });
            pins = visible;
            unsafe_constraints = held;
        }

        info!(
            "Resolved {} packages in {} rounds ({} unsafe held back)",
            pins.len(),
            rounds,
            unsafe_constraints.len()
        );
        Ok(Resolution {
            pins,
            unsafe_constraints,
            rounds,
        })
    }

    /// Artifact hashes for every member of a closure, by identity key
    ///
    /// Version control links and editables have no artifact and map to an
    /// empty set.
    pub fn resolve_hashes(&self, pins: &[Requirement]) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let repository = self.repository;
        self.pool()?.install(|| {
            pins.par_iter()
                .map(|req| {
                    if req.editable || req.is_vcs_link() {
                        Ok((req.key(), BTreeSet::new()))
                    } else {
                        repository.get_hashes(req).map(|hashes| (req.key(), hashes))
                    }
                })
                .collect()
        })
    }

    /// Reverse dependencies of a closure, read from the dependency cache
    pub fn reverse_dependencies(
        &mut self,
        pins: &[Requirement],
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        self.cache.reverse_dependencies(pins)
    }
}

fn best_match<R: Repository + ?Sized>(
    repository: &R,
    req: &Requirement,
    prereleases: bool,
) -> Result<Requirement> {
    let mut best = if req.editable || req.is_vcs_link() {
        req.clone()
    } else {
        repository.find_best_match(req, prereleases)?
    };
    best.constraint = req.constraint;
    if best.comes_from.is_none() {
        best.comes_from = req.comes_from.clone();
    }
    Ok(best)
}

/// Group requirements by identity key and combine each group into one
///
/// Specifiers are intersected, extras unioned, and the result is only a
/// constraint when every member is. Two members pinning different exact
/// versions are a [`Error::ConflictingPins`]. The groups come back sorted by
/// key.
pub fn group_constraints<'r>(
    reqs: impl IntoIterator<Item = &'r Requirement>,
) -> Result<Vec<Requirement>> {
    let mut groups: BTreeMap<String, Vec<&Requirement>> = BTreeMap::new();
    for req in reqs {
        groups.entry(req.key()).or_default().push(req);
    }
    groups.into_values().map(|group| combine_group(&group)).collect()
}

fn combine_group(group: &[&Requirement]) -> Result<Requirement> {
    let mut pinned: Option<&Requirement> = None;
    for req in group {
        let Some(version) = req.pinned_version() else {
            continue;
        };
        match pinned {
            Some(first) if first.pinned_version().as_ref() != Some(&version) => {
                return Err(Error::ConflictingPins {
                    first: first.describe(),
                    second: req.describe(),
                });
            }
            Some(_) => {}
            None => pinned = Some(req),
        }
    }

    let Some((first, rest)) = group.split_first() else {
        return Err(Error::InitError("empty requirement group".to_string()));
    };

    let mut combined = (*first).clone();
    let mut sources: Vec<String> = first.comes_from.iter().cloned().collect();
    for req in rest {
        combined.specifiers = version::combine(&combined.specifiers, &req.specifiers);
        combined.extras.extend(req.extras.iter().cloned());
        combined.hashes.extend(req.hashes.iter().cloned());
        combined.constraint &= req.constraint;
        if combined.link.is_none() && req.link.is_some() {
            combined.link = req.link.clone();
            combined.editable = req.editable;
        }
        if combined.marker.as_ref().map(|m| m.to_string()) != req.marker.as_ref().map(|m| m.to_string()) {
            combined.marker = None;
        }
        if let Some(source) = &req.comes_from
            && !sources.contains(source)
        {
            sources.push(source.clone());
        }
    }
    combined.comes_from = (!sources.is_empty()).then(|| sources.join(", "));
    Ok(combined)
}
