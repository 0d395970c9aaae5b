// src/config.rs
//! Resolver options and the configuration boundary

use crate::error::{Error, Result};
use crate::requirement::Requirement;
use crate::sync::PACKAGES_TO_IGNORE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default JSON API base of the package index
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

/// Options controlling a resolve, loadable from the `[options]` table of a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverOptions {
    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Additional indexes, queried in order after `index_url`
    #[serde(default)]
    pub extra_index_urls: Vec<String>,

    /// Dependency cache and downloaded artifacts; the user cache dir when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Identity of the runtime that reports dependencies (e.g. `py3.11`)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default)]
    pub prereleases: bool,

    /// Show unsafe packages in the resolved output
    #[serde(default)]
    pub allow_unsafe: bool,

    #[serde(default)]
    pub generate_hashes: bool,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    /// Worker threads used to fan out index queries within a round
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Per-request network timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Installed packages whose dependency trees are never uninstalled by sync
    #[serde(default = "default_protected")]
    pub protected: Vec<String>,
}

fn default_index_url() -> String {
    DEFAULT_INDEX_URL.to_string()
}

fn default_runtime() -> String {
    "py3".to_string()
}

fn default_max_rounds() -> usize {
    10
}

fn default_jobs() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_protected() -> Vec<String> {
    PACKAGES_TO_IGNORE.iter().map(|name| name.to_string()).collect()
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            extra_index_urls: Vec::new(),
            cache_dir: None,
            runtime: default_runtime(),
            prereleases: false,
            allow_unsafe: false,
            generate_hashes: false,
            max_rounds: default_max_rounds(),
            jobs: default_jobs(),
            timeout_secs: default_timeout_secs(),
            protected: default_protected(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OptionsFile {
    #[serde(default)]
    options: ResolverOptions,
}

impl ResolverOptions {
    /// Parse options from TOML text; a missing `[options]` table gives defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: OptionsFile = toml::from_str(content)?;
        file.options.validate()?;
        Ok(file.options)
    }

    /// Load options from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(Error::ParseError("max_rounds must be at least 1".to_string()));
        }
        if self.jobs == 0 {
            return Err(Error::ParseError("jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Directory holding the dependency cache
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("pinset")
        })
    }

    /// All index URLs in query order
    pub fn index_urls(&self) -> Vec<String> {
        std::iter::once(self.index_url.clone())
            .chain(self.extra_index_urls.iter().cloned())
            .collect()
    }
}

/// Source of requirement sets and options
///
/// Reading requirement files from disk is left to implementors; the resolver
/// only consumes the structured result.
pub trait ConfigSource {
    /// Requirement sets by label (e.g. `base`, `test`)
    fn requirement_sets(&self) -> Result<BTreeMap<String, Vec<Requirement>>>;

    fn options(&self) -> Result<ResolverOptions>;

    /// Every requirement of every set, tagged with the set it came from
    fn constraints(&self) -> Result<Vec<Requirement>> {
        Ok(self
            .requirement_sets()?
            .into_iter()
            .flat_map(|(label, reqs)| {
                reqs.into_iter().map(move |req| {
                    if req.comes_from.is_some() {
                        req
                    } else {
                        req.from_source(format!("requirements-{}", label))
                    }
                })
            })
            .collect())
    }
}
