// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use pinset::repository::{Candidate, PackageIndex, RemoteIndexRepository};
use pinset::version::{Version, parse_version};
use pinset::{DependencyCache, Error, MarkerEnvironment, Requirement, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct Release {
    name: String,
    version: Version,
    requires: Vec<String>,
}

/// In-memory package index that counts every call made to it
#[derive(Default)]
pub struct FakeIndex {
    releases: BTreeMap<String, Vec<Release>>,
    broken: BTreeSet<String>,
    direct: BTreeMap<String, Vec<String>>,
    pub listing_calls: AtomicUsize,
    pub dependency_calls: AtomicUsize,
    pub artifact_calls: AtomicUsize,
}

impl FakeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a release with its declared dependencies
    pub fn with_release(mut self, name: &str, version: &str, requires: &[&str]) -> Self {
        self.releases
            .entry(pinset::normalize_name(name))
            .or_default()
            .push(Release {
                name: name.to_string(),
                version: parse_version(version).unwrap(),
                requires: requires.iter().map(|r| r.to_string()).collect(),
            });
        self
    }

    /// Serve a release that is only reachable through a direct link
    pub fn with_direct_release(mut self, url: &str, requires: &[&str]) -> Self {
        self.direct.insert(
            url.to_string(),
            requires.iter().map(|r| r.to_string()).collect(),
        );
        self
    }

    /// Make dependency discovery fail for a package
    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.insert(pinset::normalize_name(name));
        self
    }

    pub fn total_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
            + self.dependency_calls.load(Ordering::SeqCst)
            + self.artifact_calls.load(Ordering::SeqCst)
    }

    pub fn dependency_calls(&self) -> usize {
        self.dependency_calls.load(Ordering::SeqCst)
    }
}

impl PackageIndex for FakeIndex {
    fn find_all_candidates(&self, name: &str) -> Result<Vec<Candidate>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .releases
            .get(&pinset::normalize_name(name))
            .map(|releases| {
                releases
                    .iter()
                    .map(|r| {
                        Candidate::new(
                            &r.name,
                            r.version.clone(),
                            format!("https://files.example.com/{}-{}.tar.gz", r.name, r.version),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_dependencies(&self, req: &Requirement) -> Result<Vec<String>> {
        self.dependency_calls.fetch_add(1, Ordering::SeqCst);
        let key = req.key();
        if self.broken.contains(&key) {
            tracing::warn!("setup.py egg_info failed for {}", key);
            return Err(Error::DownloadError(format!("could not build {key}")));
        }

        if let Some(link) = &req.link {
            return self
                .direct
                .get(link.url())
                .cloned()
                .ok_or_else(|| Error::NotFoundError(format!("{link} is not served")));
        }

        let version = req.pinned_version();
        self.releases
            .get(&key)
            .and_then(|releases| releases.iter().find(|r| Some(&r.version) == version.as_ref()))
            .map(|r| r.requires.clone())
            .ok_or_else(|| Error::NotFoundError(format!("{req} is not in the index")))
    }

    fn open_artifact(&self, location: &str) -> Result<Box<dyn Read + Send>> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(location.as_bytes().to_vec())))
    }
}

pub const HELPER_WHEEL: &str = "https://files.example.com/helper-1.0-py3-none-any.whl";

/// A small package universe shared by the resolver tests
pub fn sample_index() -> FakeIndex {
    FakeIndex::new()
        .with_release("Django", "1.11.29", &["pytz"])
        .with_release("Django", "2.2.28", &["pytz", "sqlparse>=0.2.2"])
        .with_release("Django", "4.2.7", &["asgiref<4,>=3.6.0", "sqlparse>=0.3.1"])
        .with_release("pytz", "2023.3", &[])
        .with_release("sqlparse", "0.4.4", &[])
        .with_release("asgiref", "3.7.2", &[])
        .with_release(
            "flake8",
            "6.1.0",
            &[
                "mccabe<0.8.0,>=0.7.0",
                "pycodestyle<2.12.0,>=2.11.0",
                "pyflakes<3.2.0,>=3.1.0",
            ],
        )
        .with_release("mccabe", "0.7.0", &[])
        .with_release("pycodestyle", "2.11.1", &[])
        .with_release("pyflakes", "3.1.0", &[])
        .with_release(
            "requests",
            "2.31.0",
            &[
                "idna<4,>=2.5",
                "urllib3<3,>=1.21.1",
                "PySocks!=1.5.7,>=1.5.6 ; extra == 'socks'",
                "win-inet-pton ; sys_platform == 'win32'",
            ],
        )
        .with_release("idna", "3.4", &[])
        .with_release("urllib3", "2.0.7", &[])
        .with_release("PySocks", "1.7.1", &[])
        .with_release("pkgX", "1.0", &[])
        .with_release("pkgX", "2.0", &[])
        .with_release("setuptools-scm", "8.0.4", &["setuptools", "packaging>=20"])
        .with_release("setuptools", "68.2.2", &[])
        .with_release("packaging", "23.2", &[])
        .with_release("libA", "1.2.0", &[])
        .with_release("libA", "2.5.0", &[])
        .with_release("left", "1.0", &["pkgX==1.0"])
        .with_release("right", "1.0", &["pkgX==2.0"])
        .with_release("installer-shim", "1.0", &["pip>=23"])
        .with_release("pip", "23.3.1", &["pip-vendor"])
        .with_release("pip-vendor", "1.0", &[])
        .with_release(
            "app",
            "1.0",
            &["helper @ https://files.example.com/helper-1.0-py3-none-any.whl", "pytz"],
        )
        .with_direct_release(HELPER_WHEEL, &["idna>=3"])
        .with_release("broken", "0.1", &[])
        .with_broken("broken")
}

/// Repository over [`sample_index`] evaluating markers for a Linux host
pub fn sample_repository() -> RemoteIndexRepository<FakeIndex> {
    RemoteIndexRepository::new(
        sample_index(),
        MarkerEnvironment::new()
            .with("sys_platform", "linux")
            .with("python_version", "3.11"),
    )
}

/// Create a dependency cache in a fresh temp dir.
///
/// Returns (TempDir, cache) - keep the TempDir alive to prevent cleanup.
pub fn temp_cache() -> (TempDir, DependencyCache) {
    let temp_dir = tempfile::tempdir().unwrap();
    let cache = DependencyCache::new(temp_dir.path(), "py3.11").unwrap();
    (temp_dir, cache)
}

pub fn reqs(lines: &[&str]) -> Vec<Requirement> {
    lines.iter().map(|line| Requirement::parse(line).unwrap()).collect()
}

pub fn lines(reqs: &[Requirement]) -> Vec<String> {
    reqs.iter().map(|req| req.to_string()).collect()
}
