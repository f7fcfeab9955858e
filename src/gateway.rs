//! Access to the target project
//!
//! Every file read and write goes through [`ProjectGateway`]. The filesystem
//! implementation is scoped to one root directory: paths are resolved lexically
//! first, then canonicalized, and anything that lands outside the root is refused
//! before the filesystem is touched for writing.

use crate::blueprint::Blueprint;
use crate::config::TargetConfig;
use crate::error::{Classify, FailureKind};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One row of a project listing. Names and metadata only, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileEntry {
    File {
        path: String,
        size: u64,
        modified: Option<String>,
    },
    Directory {
        path: String,
    },
}

impl FileEntry {
    pub fn path(&self) -> &str {
        match self {
            FileEntry::File { path, .. } | FileEntry::Directory { path } => path,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileEntry::File { .. })
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            FileEntry::File { size, .. } => Some(*size),
            FileEntry::Directory { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Unreachable(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("{path} is {size} bytes, limit is {max}")]
    TooLarge { path: String, size: u64, max: u64 },
    #[error("file type not allowed: {0}")]
    DisallowedExtension(String),
    #[error("path escapes the project root: {0}")]
    PathEscape(String),
    #[error("{0} is not UTF-8 text")]
    NotText(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl Classify for GatewayError {
    fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Unreachable(_) => FailureKind::TargetUnreachable,
            GatewayError::NotFound(_) => FailureKind::NotFound,
            GatewayError::TooLarge { .. }
            | GatewayError::DisallowedExtension(_)
            | GatewayError::PathEscape(_)
            | GatewayError::NotText(_) => FailureKind::Invalid,
            GatewayError::Io { .. } => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The four operations the assistant needs from a target project.
pub trait ProjectGateway: Send + Sync {
    /// Ask the running target to describe its routes
    fn fetch_blueprint(&self) -> Result<Blueprint>;

    /// Recursive listing under `dir` (relative to the root, "" or "." for all)
    fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>>;

    fn read_file(&self, path: &str) -> Result<String>;

    /// Replace the file content atomically
    fn write_file(&self, path: &str, content: &str) -> Result<()>;
}

/// A target project on the local filesystem, optionally running at `base_url`
pub struct TargetProject {
    root: PathBuf,
    base_url: Option<String>,
    client: reqwest::blocking::Client,
    policy: TargetConfig,
}

impl TargetProject {
    pub fn new(config: &TargetConfig) -> Result<Self> {
        let root = config.root.canonicalize().map_err(|source| GatewayError::Io {
            path: config.root.display().to_string(),
            source,
        })?;
        if !root.is_dir() {
            return Err(GatewayError::NotFound(root.display().to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| GatewayError::Unreachable(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            root,
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            client,
            policy: config.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically normalize a relative path, refusing anything that climbs out
    fn normalize(&self, rel: &str) -> Result<PathBuf> {
        let trimmed = rel.trim();
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
            return Err(GatewayError::PathEscape(rel.to_string()));
        }

        let mut normalized = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(GatewayError::PathEscape(rel.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(GatewayError::PathEscape(rel.to_string()));
                }
            }
        }
        Ok(normalized)
    }

    /// Resolve to an absolute path inside the root, following symlinks that exist
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let joined = self.root.join(self.normalize(rel)?);

        // Canonicalize the deepest existing ancestor; symlinks are resolved there
        let mut existing = joined.as_path();
        let mut tail = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Err(GatewayError::PathEscape(rel.to_string())),
            }
        }

        let mut resolved = existing.canonicalize().map_err(|source| GatewayError::Io {
            path: rel.to_string(),
            source,
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(GatewayError::PathEscape(rel.to_string()));
        }
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }
        Ok(resolved)
    }

    fn check_extension(&self, rel: &str, path: &Path) -> Result<()> {
        let allowed = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.policy.allows_extension(ext))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(GatewayError::DisallowedExtension(rel.to_string()))
        }
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl ProjectGateway for TargetProject {
    fn fetch_blueprint(&self) -> Result<Blueprint> {
        let Some(base) = &self.base_url else {
            return Err(GatewayError::Unreachable("no target base URL configured".to_string()));
        };

        for path in &self.policy.blueprint_paths {
            let url = format!("{}{}", base, path);
            debug!(url = %url, "requesting blueprint");

            let response = match self.client.get(&url).send() {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(GatewayError::Unreachable(format!("connection to {} timed out", base)));
                }
                Err(e) if e.is_connect() => {
                    return Err(GatewayError::Unreachable(format!(
                        "cannot connect to {}. Is the target project running?",
                        base
                    )));
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "blueprint request failed, trying next path");
                    continue;
                }
            };

            if response.status() != reqwest::StatusCode::OK {
                debug!(url = %url, status = %response.status(), "blueprint path not available");
                continue;
            }

            match response.json::<serde_json::Value>() {
                Ok(data) => {
                    let mut blueprint = Blueprint::from_json(&data);
                    blueprint.source = Some(path.clone());
                    info!(path = %path, endpoints = blueprint.endpoint_count(), "fetched blueprint");
                    return Ok(blueprint);
                }
                Err(_) => {
                    debug!(url = %url, "blueprint response was not JSON");
                    continue;
                }
            }
        }

        Err(GatewayError::Unreachable(format!(
            "could not fetch blueprint from {}; tried {}",
            base,
            self.policy.blueprint_paths.join(", ")
        )))
    }

    fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>> {
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Err(GatewayError::NotFound(dir.to_string()));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&base)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !name.starts_with('.') && !(e.file_type().is_dir() && self.policy.is_excluded_dir(&name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = self.relative(entry.path());

            if entry.file_type().is_dir() {
                entries.push(FileEntry::Directory { path });
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let allowed = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| self.policy.allows_extension(ext))
                .unwrap_or(false);
            if !allowed {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.len() > self.policy.max_file_size {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339());
            entries.push(FileEntry::File {
                path,
                size: meta.len(),
                modified,
            });
        }

        entries.sort_by(|a, b| a.path().cmp(b.path()));
        debug!(dir = %dir, count = entries.len(), "listed target files");
        Ok(entries)
    }

    fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve(path)?;
        self.check_extension(path, &resolved)?;

        let meta = match std::fs::metadata(&resolved) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(GatewayError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotFound(path.to_string()));
            }
            Err(source) => {
                return Err(GatewayError::Io {
                    path: path.to_string(),
                    source,
                })
            }
        };
        if meta.len() > self.policy.max_file_size {
            return Err(GatewayError::TooLarge {
                path: path.to_string(),
                size: meta.len(),
                max: self.policy.max_file_size,
            });
        }

        let bytes = std::fs::read(&resolved).map_err(|source| GatewayError::Io {
            path: path.to_string(),
            source,
        })?;
        String::from_utf8(bytes).map_err(|_| GatewayError::NotText(path.to_string()))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        self.check_extension(path, &resolved)?;
        if resolved.is_dir() {
            return Err(GatewayError::NotFound(path.to_string()));
        }

        let io_err = |source| GatewayError::Io {
            path: path.to_string(),
            source,
        };
        let parent = resolved
            .parent()
            .ok_or_else(|| GatewayError::PathEscape(path.to_string()))?;
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()));
        if let Err(e) = std::fs::write(&tmp, content) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }
        if let Err(e) = std::fs::rename(&tmp, &resolved) {
            warn!(path = %path, error = %e, "rename over target failed");
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(e));
        }

        info!(path = %path, bytes = content.len(), "wrote target file");
        Ok(())
    }
}
