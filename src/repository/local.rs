// src/repository/local.rs

//! Repository that prefers existing pins
//!
//! Wrapping a repository in [`LocalOverrideRepository`] keeps a previously
//! pinned version for as long as it still satisfies the requirement being
//! resolved, so re-running a resolve does not move every package to its
//! newest release.

use super::{Repository, check_is_hashable};
use crate::error::Result;
use crate::requirement::Requirement;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Decorator reusing existing pins before asking the wrapped repository
pub struct LocalOverrideRepository<R: Repository> {
    repository: R,
    existing_pins: HashMap<String, Requirement>,
}

impl<R: Repository> LocalOverrideRepository<R> {
    /// Wrap `repository`; only pinned entries of `existing_pins` are kept
    pub fn new(existing_pins: impl IntoIterator<Item = Requirement>, repository: R) -> Self {
        let existing_pins = existing_pins
            .into_iter()
            .filter(|pin| pin.is_pinned())
            .map(|pin| (pin.key(), pin))
            .collect();
        Self {
            repository,
            existing_pins,
        }
    }

    pub fn inner(&self) -> &R {
        &self.repository
    }

    /// The existing pin for `req` if its version still satisfies `req`
    fn reusable_pin(&self, req: &Requirement) -> Option<&Requirement> {
        if req.editable || req.link.is_some() {
            return None;
        }
        let pin = self.existing_pins.get(&req.key())?;
        let version = pin.pinned_version()?;
        req.specifiers.contains(&version).then_some(pin)
    }
}

impl<R: Repository> Repository for LocalOverrideRepository<R> {
    fn find_best_match(&self, req: &Requirement, prereleases: bool) -> Result<Requirement> {
        match self.reusable_pin(req) {
            Some(pin) => {
                debug!("Reusing existing pin {} for {}", pin, req);
                let mut reused = pin.clone();
                reused.extras.extend(req.extras.iter().cloned());
                reused.constraint = req.constraint;
                reused.comes_from = req.comes_from.clone();
                Ok(reused)
            }
            None => self.repository.find_best_match(req, prereleases),
        }
    }

    fn get_dependencies(&self, req: &Requirement) -> Result<Vec<Requirement>> {
        self.repository.get_dependencies(req)
    }

    fn get_hashes(&self, req: &Requirement) -> Result<BTreeSet<String>> {
        check_is_hashable(req)?;
        if let Some(pin) = self.existing_pins.get(&req.key())
            && !pin.hashes.is_empty()
            && !req.editable
            && req.link.is_none()
            && pin.pinned_version().is_some()
            && pin.pinned_version() == req.pinned_version()
        {
            return Ok(pin.hashes.clone());
        }
        self.repository.get_hashes(req)
    }

    fn clear_caches(&self) {
        self.repository.clear_caches();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::version;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Always answers 2.5.0 and counts how often it was asked
    #[derive(Default)]
    struct NewestOnly {
        calls: AtomicUsize,
    }

    impl Repository for NewestOnly {
        fn find_best_match(&self, req: &Requirement, _prereleases: bool) -> Result<Requirement> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            req.with_version(&req.name, &version::parse_version("2.5.0").unwrap())
        }

        fn get_dependencies(&self, _req: &Requirement) -> Result<Vec<Requirement>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn get_hashes(&self, req: &Requirement) -> Result<BTreeSet<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::NotHashable {
                requirement: req.to_string(),
                reason: "no artifacts".to_string(),
            })
        }
    }

    fn override_repo(pins: &[&str]) -> LocalOverrideRepository<NewestOnly> {
        LocalOverrideRepository::new(
            pins.iter().map(|line| Requirement::parse(line).unwrap()),
            NewestOnly::default(),
        )
    }

    #[test]
    fn test_reuses_satisfying_pin() {
        let repo = override_repo(&["libA==1.2.0"]);
        let best = repo
            .find_best_match(&Requirement::parse("liba>=1.0,<2.0").unwrap(), false)
            .unwrap();
        assert_eq!(best.to_string(), "liba==1.2.0");
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delegates_when_pin_no_longer_satisfies() {
        let repo = override_repo(&["libA==1.2.0"]);
        let best = repo
            .find_best_match(&Requirement::parse("libA>=2.0").unwrap(), false)
            .unwrap();
        assert_eq!(best.to_string(), "liba==2.5.0");
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unpinned_existing_entries_are_ignored() {
        let repo = override_repo(&["libA>=1.0"]);
        repo.find_best_match(&Requirement::parse("libA").unwrap(), false)
            .unwrap();
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reuses_pinned_hashes() {
        let pin = format!(
            "six==1.16.0 --hash=sha256:{} --hash=sha256:{}",
            "a".repeat(64),
            "b".repeat(64)
        );
        let repo = override_repo(&[pin.as_str()]);
        let hashes = repo
            .get_hashes(&Requirement::parse("six==1.16.0").unwrap())
            .unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 0);

        // A different version goes to the wrapped repository
        assert!(
            repo.get_hashes(&Requirement::parse("six==1.17.0").unwrap())
                .is_err()
        );
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_hashes_rejects_unhashable_before_reuse() {
        let pin = format!("six==1.16.0 --hash=sha256:{}", "a".repeat(64));
        let repo = override_repo(&[pin.as_str()]);
        let err = repo
            .get_hashes(&Requirement::parse("six>=1.0").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::NotHashable { .. }));
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_dependencies_always_delegates() {
        let repo = override_repo(&["six==1.16.0"]);
        repo.get_dependencies(&Requirement::parse("six==1.16.0").unwrap())
            .unwrap();
        assert_eq!(repo.inner().calls.load(Ordering::SeqCst), 1);
    }
}
