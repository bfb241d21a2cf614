//! Where spec documents come from

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use dboxed_reconciler::ReconcileError;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Coordinates of one spec document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    /// Repository URL
    pub url: String,
    /// Branch, tag or commit; empty for the default
    pub reference: String,
    /// Path of the document inside the repository
    pub path: String,
}

impl SourceLocation {
    pub fn new(
        url: impl Into<String>,
        reference: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reference.is_empty() {
            write!(f, "{}#{}", self.url, self.path)
        } else {
            write!(f, "{}@{}#{}", self.url, self.reference, self.path)
        }
    }
}

/// Fetch failures
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Spec document not found: {0}")]
    NotFound(String),

    #[error("Invalid source location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<SourceError> for ReconcileError {
    fn from(err: SourceError) -> Self {
        let message = err.to_string();
        match err {
            SourceError::InvalidLocation { .. } => ReconcileError::invalid_spec(message),
            _ => ReconcileError::fetch(message),
        }
    }
}

/// Retrieves raw spec documents
#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError>;
}

/// Reads documents from checkouts below a root directory.
///
/// The document for `url`, `reference` and `path` is looked up at
/// `<root>/<url>/<reference>/<path>` and then at `<root>/<url>/<path>`, with
/// `url` and `reference` flattened to a single path segment each.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    root: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Candidate files for a location, most specific first
    pub fn candidates(&self, location: &SourceLocation) -> Result<Vec<PathBuf>, SourceError> {
        let invalid = |reason: &str| SourceError::InvalidLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };

        let repo = sanitize_segment(&location.url);
        if repo.is_empty() {
            return Err(invalid("empty repository url"));
        }
        let relative = Path::new(&location.path);
        if location.path.is_empty() {
            return Err(invalid("empty document path"));
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(invalid("document path must stay inside the repository"));
        }

        let base = self.root.join(repo);
        let mut paths = Vec::with_capacity(2);
        let reference = sanitize_segment(&location.reference);
        if !reference.is_empty() {
            paths.push(base.join(reference).join(relative));
        }
        paths.push(base.join(relative));
        Ok(paths)
    }
}

/// Map a URL or ref to one file name: anything outside `[A-Za-z0-9._-]`
/// becomes `_`.
fn sanitize_segment(value: &str) -> String {
    let segment: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if segment.chars().all(|c| c == '.') {
        return String::new();
    }
    segment
}

#[async_trait]
impl SourceFetcher for DirectoryFetcher {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError> {
        for path in self.candidates(location)? {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(path = %path.display(), bytes = bytes.len(), "Read spec document");
                    return Ok(bytes);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SourceError::Io {
                        path: path.display().to_string(),
                        source: e,
                    })
                }
            }
        }
        Err(SourceError::NotFound(location.to_string()))
    }
}

/// Documents held in memory, keyed by location.
///
/// A lookup falls back to the same url and path with an empty reference.
#[derive(Debug, Default)]
pub struct InMemoryFetcher {
    documents: RwLock<HashMap<SourceLocation, Vec<u8>>>,
}

impl InMemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, location: SourceLocation, content: impl Into<Vec<u8>>) {
        self.documents.write().await.insert(location, content.into());
    }

    pub async fn remove(&self, location: &SourceLocation) -> Option<Vec<u8>> {
        self.documents.write().await.remove(location)
    }
}

#[async_trait]
impl SourceFetcher for InMemoryFetcher {
    async fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError> {
        let documents = self.documents.read().await;
        if let Some(content) = documents.get(location) {
            return Ok(content.clone());
        }
        let fallback = SourceLocation {
            reference: String::new(),
            ..location.clone()
        };
        documents
            .get(&fallback)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(location.to_string()))
    }
}
