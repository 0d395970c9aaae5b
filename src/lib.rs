// src/lib.rs

//! Pinset
//!
//! Reproducible dependency pinning for Python package sets: resolve abstract
//! requirements into a closure of exact pins, and plan the installs and
//! removals that bring an environment in line with that closure.
//!
//! # Architecture
//!
//! - Requirements: normalized identity keys, PEP 440 specifiers, extras, markers
//! - Dependency cache: dependency lists of pinned packages persisted per runtime
//! - Repositories: an index-backed repository, wrapped by one that keeps existing pins
//! - Resolver: rounds of best-match lookups until nothing changes
//! - Sync: install/uninstall planning that protects the tool's own dependencies

pub mod cache;
pub mod config;
mod error;
pub mod hash;
pub mod logs;
pub mod repository;
pub mod requirement;
pub mod resolver;
pub mod sync;
pub mod version;

pub use cache::DependencyCache;
pub use config::{ConfigSource, ResolverOptions};
pub use error::{Error, Result};
pub use hash::{ArtifactHash, HashAlgorithm};
pub use repository::{
    Candidate, JsonIndexClient, LocalOverrideRepository, PackageIndex, RemoteIndexRepository,
    Repository,
};
pub use requirement::{Link, MarkerEnvironment, MarkerTree, Requirement, normalize_name};
pub use resolver::{Resolution, Resolver, UNSAFE_PACKAGES};
pub use sync::{InstalledDistribution, PACKAGES_TO_IGNORE, SyncPlan, dependency_tree, diff, merge};
