// src/repository/index.rs

//! Package index boundary
//!
//! [`PackageIndex`] is the narrow interface to a remote package index: list
//! the candidates of a project, report the dependencies a release declares,
//! and open artifact bytes for hashing. [`JsonIndexClient`] implements it
//! over the JSON API (`<index>/<project>/json`) with a blocking HTTP client
//! and retries.

use super::Candidate;
use crate::error::{Error, Result};
use crate::requirement::Requirement;
use crate::version::parse_version;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum attempts per HTTP request
const MAX_RETRIES: u32 = 3;

/// Delay between attempts, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Access to a package index
pub trait PackageIndex: Send + Sync {
    /// Every known release artifact of a project
    fn find_all_candidates(&self, name: &str) -> Result<Vec<Candidate>>;

    /// Raw dependency strings (with markers) declared by a pinned requirement
    fn fetch_dependencies(&self, req: &Requirement) -> Result<Vec<String>>;

    /// Open the bytes of an artifact by URL or path
    fn open_artifact(&self, location: &str) -> Result<Box<dyn Read + Send>>;
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    name: String,
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    url: String,
    #[serde(default)]
    yanked: bool,
}

/// Parse a project document into candidates, skipping yanked files and
/// versions that are not valid PEP 440
pub(crate) fn parse_project_candidates(body: &[u8]) -> Result<Vec<Candidate>> {
    let document: ProjectDocument = serde_json::from_slice(body)
        .map_err(|e| Error::ParseError(format!("Invalid project document: {e}")))?;

    let mut candidates = Vec::new();
    for (version, files) in document.releases {
        let Ok(parsed) = parse_version(&version) else {
            debug!("Skipping unparsable version {} of {}", version, document.info.name);
            continue;
        };
        candidates.extend(
            files
                .into_iter()
                .filter(|file| !file.yanked)
                .map(|file| Candidate::new(&document.info.name, parsed.clone(), file.url)),
        );
    }
    Ok(candidates)
}

/// Parse the `requires_dist` list out of a release document
pub(crate) fn parse_requires_dist(body: &[u8]) -> Result<Vec<String>> {
    let document: ProjectDocument = serde_json::from_slice(body)
        .map_err(|e| Error::ParseError(format!("Invalid release document: {e}")))?;
    Ok(document.info.requires_dist.unwrap_or_default())
}

/// Package index client for JSON API indexes
pub struct JsonIndexClient {
    client: Client,
    index_urls: Vec<String>,
    max_retries: u32,
}

impl JsonIndexClient {
    /// Create a client querying `index_urls` in order
    pub fn new(index_urls: Vec<String>, timeout: Duration) -> Result<Self> {
        if index_urls.is_empty() {
            return Err(Error::InitError("At least one index URL is required".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            index_urls: index_urls
                .into_iter()
                .map(|url| url.trim_end_matches('/').to_string())
                .collect(),
            max_retries: MAX_RETRIES,
        })
    }

    /// GET with retry; `None` when the index answers 404
    fn get(&self, url: &str) -> Result<Option<Response>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) if response.status().is_success() => return Ok(Some(response)),
                Ok(response) if !response.status().is_server_error() => {
                    return Err(Error::DownloadError(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }
                Ok(response) if attempt >= self.max_retries => {
                    return Err(Error::DownloadError(format!(
                        "HTTP {} from {} after {attempt} attempts",
                        response.status(),
                        url
                    )));
                }
                Err(e) if attempt >= self.max_retries => {
                    return Err(Error::DownloadError(format!(
                        "Failed to fetch {url} after {attempt} attempts: {e}"
                    )));
                }
                Ok(response) => {
                    warn!(
                        "HTTP {} from {} (attempt {}/{}), retrying...",
                        response.status(),
                        url,
                        attempt,
                        self.max_retries
                    );
                }
                Err(e) => {
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}, retrying...",
                        url, attempt, self.max_retries, e
                    );
                }
            }
            thread::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)));
        }
    }

    fn get_bytes(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut response) = self.get(url)? else {
            return Ok(None);
        };
        let mut body = Vec::new();
        response
            .read_to_end(&mut body)
            .map_err(|e| Error::DownloadError(format!("Failed to read response from {url}: {e}")))?;
        Ok(Some(body))
    }
}

impl PackageIndex for JsonIndexClient {
    fn find_all_candidates(&self, name: &str) -> Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for index in &self.index_urls {
            let url = format!("{}/{}/json", index, name);
            debug!("Fetching project listing {}", url);
            if let Some(body) = self.get_bytes(&url)? {
                candidates.extend(parse_project_candidates(&body)?);
            }
        }
        info!("Found {} candidate artifacts for {}", candidates.len(), name);
        Ok(candidates)
    }

    fn fetch_dependencies(&self, req: &Requirement) -> Result<Vec<String>> {
        if req.link.is_some() {
            return Err(Error::UnsupportedConstraint {
                requirement: req.to_string(),
                reason: "dependencies of direct links can only be discovered by building them"
                    .to_string(),
            });
        }
        let version = req.pinned_version().ok_or_else(|| Error::UnsupportedConstraint {
            requirement: req.to_string(),
            reason: "dependencies can only be fetched for pinned requirements".to_string(),
        })?;

        for index in &self.index_urls {
            let url = format!("{}/{}/{}/json", index, req.key(), version);
            debug!("Fetching release metadata {}", url);
            if let Some(body) = self.get_bytes(&url)? {
                return parse_requires_dist(&body);
            }
        }
        Err(Error::NotFoundError(format!(
            "Release {} {} not found in any index",
            req.key(),
            version
        )))
    }

    fn open_artifact(&self, location: &str) -> Result<Box<dyn Read + Send>> {
        if let Some(path) = local_path(location)? {
            if path.is_dir() {
                return Err(Error::NotHashable {
                    requirement: location.to_string(),
                    reason: "cannot hash a directory".to_string(),
                });
            }
            let file = File::open(&path)
                .map_err(|e| Error::IoError(format!("Failed to open {}: {e}", path.display())))?;
            return Ok(Box::new(file));
        }

        let url = location.split('#').next().unwrap_or(location);
        debug!("Downloading {} for hashing", url);
        match self.get(url)? {
            Some(response) => Ok(Box::new(response)),
            None => Err(Error::NotFoundError(format!("Artifact not found: {url}"))),
        }
    }
}

fn local_path(location: &str) -> Result<Option<PathBuf>> {
    let location = location.split('#').next().unwrap_or(location);
    if location.starts_with("file:") {
        let url = url::Url::parse(location)
            .map_err(|e| Error::ParseError(format!("Invalid file URL {location}: {e}")))?;
        let path = url
            .to_file_path()
            .map_err(|_| Error::ParseError(format!("Not a local file URL: {location}")))?;
        Ok(Some(path))
    } else if location.contains("://") {
        Ok(None)
    } else {
        Ok(Some(PathBuf::from(location)))
    }
}
