// src/cache.rs

//! Persistent dependency cache
//!
//! Maps a pinned package (normalized name plus version and extras) to the
//! dependency requirement strings it declares. Fetching those strings means
//! downloading or building the package, so the map is kept on disk across
//! runs in one JSON document per runtime:
//!
//! ```text
//! {"__format__": 1, "dependencies": {"flake8": {"2.4.0": ["pep8>=1.5.7", ...]}}}
//! ```
//!
//! Unpinned and editable entries may live in memory for one resolve but are
//! stripped on every write, so the file only ever holds reproducible data.

use crate::error::{Error, Result};
use crate::requirement::Requirement;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Format version written to and required from the cache document
pub const CACHE_FORMAT: u32 = 1;

/// Version string of a direct-link requirement that has no pinned version
pub const UNPINNED_SENTINEL: &str = ":UNPINNED:";

/// Marker appended to the version string of editable requirements
pub const EDITABLE_SENTINEL: &str = ":EDITABLE:";

type DependencyMap = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    #[serde(rename = "__format__")]
    format: u32,
    dependencies: DependencyMap,
}

/// Disk-backed dependency cache for one runtime
#[derive(Debug)]
pub struct DependencyCache {
    cache_file: PathBuf,
    entries: Option<DependencyMap>,
}

impl DependencyCache {
    /// Open the cache for `runtime` inside `cache_dir`
    ///
    /// The directory is created if needed. Nothing is read until the first
    /// lookup.
    pub fn new(cache_dir: &Path, runtime: &str) -> Result<Self> {
        fs::create_dir_all(cache_dir).map_err(|e| {
            Error::InitError(format!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            cache_file: cache_dir.join(format!("depcache-{}.json", runtime)),
            entries: None,
        })
    }

    /// Path of the backing JSON document
    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Build the `(name, version[extras])` key for a requirement
    ///
    /// Unpinned direct links use [`UNPINNED_SENTINEL`] as their version and
    /// editables get [`EDITABLE_SENTINEL`] plus their link appended, so an
    /// editable checkout never shadows a real release with the same version.
    pub fn cache_key(req: &Requirement) -> Result<(String, String)> {
        let version = match req.version() {
            Some(version) => version.to_string(),
            None if req.link.is_some() => UNPINNED_SENTINEL.to_string(),
            None => {
                return Err(Error::UnsupportedConstraint {
                    requirement: req.to_string(),
                    reason: "cannot cache dependencies of an unpinned requirement".to_string(),
                });
            }
        };

        let mut key = format!("{}{}", version, req.extras_string());
        if req.editable
            && let Some(link) = &req.link
        {
            key.push_str(EDITABLE_SENTINEL);
            key.push_str(link.url());
        }
        Ok((req.key(), key))
    }

    /// Load the cache file into memory, replacing anything held
    pub fn read(&mut self) -> Result<()> {
        self.entries = Some(read_cache_file(&self.cache_file)?);
        Ok(())
    }

    /// Serialize the stable entries and atomically replace the cache file
    pub fn write(&mut self) -> Result<()> {
        let document = CacheDocument {
            format: CACHE_FORMAT,
            dependencies: strip_unstable(self.entries()?),
        };
        let content = serde_json::to_vec(&document)?;
        atomic_write_file(&self.cache_file, &content)
    }

    /// Drop every entry, on disk too
    pub fn clear(&mut self) -> Result<()> {
        self.entries = Some(DependencyMap::new());
        self.write()
    }

    /// Look up the cached dependencies of a requirement
    pub fn get(&mut self, req: &Requirement) -> Result<Option<Vec<String>>> {
        let (name, version) = Self::cache_key(req)?;
        Ok(self
            .entries()?
            .get(&name)
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    pub fn contains(&mut self, req: &Requirement) -> Result<bool> {
        Ok(self.get(req)?.is_some())
    }

    /// Store the dependencies of a requirement and write through to disk
    pub fn set(&mut self, req: &Requirement, dependencies: Vec<String>) -> Result<()> {
        self.insert(req, dependencies)?;
        self.write()
    }

    /// Store several entries with a single write
    pub fn set_many<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a Requirement, Vec<String>)>,
    {
        for (req, dependencies) in entries {
            self.insert(req, dependencies)?;
        }
        self.write()
    }

    fn insert(&mut self, req: &Requirement, dependencies: Vec<String>) -> Result<()> {
        let (name, version) = Self::cache_key(req)?;
        self.entries_mut()?
            .entry(name)
            .or_default()
            .insert(version, dependencies);
        Ok(())
    }

    /// Invert the cached dependency relation for a set of pinned requirements
    ///
    /// Returns `dependency key -> keys of the given requirements that need
    /// it`. Every requirement passed in must already have a cache entry;
    /// nothing is fetched here.
    pub fn reverse_dependencies(
        &mut self,
        reqs: &[Requirement],
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut table: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for req in reqs {
            let dependencies = self.get(req)?.ok_or_else(|| Error::MissingCacheEntry {
                requirement: req.to_string(),
            })?;
            for dependency in dependencies {
                let dependency = Requirement::parse(&dependency)?;
                table.entry(dependency.key()).or_default().insert(req.key());
            }
        }
        Ok(table)
    }

    fn entries(&mut self) -> Result<&DependencyMap> {
        Ok(&*self.entries_mut()?)
    }

    fn entries_mut(&mut self) -> Result<&mut DependencyMap> {
        if self.entries.is_none() {
            self.read()?;
        }
        Ok(self.entries.get_or_insert_with(DependencyMap::new))
    }
}

fn read_cache_file(path: &Path) -> Result<DependencyMap> {
    if !path.exists() {
        return Ok(DependencyMap::new());
    }

    let content = fs::read(path)?;
    let document: CacheDocument =
        serde_json::from_slice(&content).map_err(|e| Error::CorruptCache {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if document.format != CACHE_FORMAT {
        return Err(Error::CorruptCache {
            path: path.to_path_buf(),
            reason: format!("unknown cache file format {}", document.format),
        });
    }

    debug!(
        "Loaded {} cached packages from {}",
        document.dependencies.len(),
        path.display()
    );
    Ok(document.dependencies)
}

fn strip_unstable(entries: &DependencyMap) -> DependencyMap {
    entries
        .iter()
        .map(|(name, versions)| {
            let stable = versions
                .iter()
                .filter(|(version, _)| {
                    !version.contains(UNPINNED_SENTINEL) && !version.contains(EDITABLE_SENTINEL)
                })
                .map(|(version, deps)| (version.clone(), deps.clone()))
                .collect();
            (name.clone(), stable)
        })
        .collect()
}

/// Write `content` to a temp file next to `path`, then rename it into place
///
/// The temp file is removed if anything fails before the rename.
fn atomic_write_file(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::IoError(format!("Cannot get parent directory for {}", path.display()))
    })?;
    fs::create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(path).map_err(|e| {
        Error::IoError(format!(
            "Failed to replace {} with temporary file: {}",
            path.display(),
            e.error
        ))
    })?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}
