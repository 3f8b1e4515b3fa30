//! Locating the `claude` executable

use std::path::{Path, PathBuf};

use super::error::ClaudeError;

const BINARY_NAME: &str = "claude";

/// Resolves the CLI binary: explicit override, well-known install paths,
/// then a `PATH` search.
#[derive(Debug, Clone)]
pub struct CliLocator {
    override_path: Option<PathBuf>,
    candidates: Vec<PathBuf>,
    use_path_lookup: bool,
}

impl Default for CliLocator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CliLocator {
    pub fn new(override_path: Option<PathBuf>) -> Self {
        Self {
            override_path,
            candidates: default_candidates(),
            use_path_lookup: true,
        }
    }

    /// Only the given path, no fallbacks
    pub fn exact(path: impl Into<PathBuf>) -> Self {
        Self {
            override_path: Some(path.into()),
            candidates: Vec::new(),
            use_path_lookup: false,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn without_path_lookup(mut self) -> Self {
        self.use_path_lookup = false;
        self
    }

    pub async fn resolve(&self) -> Result<PathBuf, ClaudeError> {
        if let Some(path) = &self.override_path {
            if is_executable(path) {
                return Ok(path.clone());
            }
            tracing::warn!("Configured CLI path {} is not executable", path.display());
        }

        if let Some(path) = self.candidates.iter().find(|p| is_executable(p)) {
            return Ok(path.clone());
        }

        if self.use_path_lookup {
            if let Some(path) = search_path(BINARY_NAME) {
                return Ok(path);
            }
        }

        Err(ClaudeError::ExecutableNotFound)
    }

    pub async fn is_installed(&self) -> bool {
        self.resolve().await.is_ok()
    }
}

fn default_candidates() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
    ];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".local/bin/claude"));
        paths.push(home.join(".npm-global/bin/claude"));
    }
    paths
}

fn search_path(name: &str) -> Option<PathBuf> {
    match which::which(name) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!("{} not found on PATH: {}", name, e);
            None
        }
    }
}

/// An existing file the current user may execute
fn is_executable(path: &Path) -> bool {
    path.is_file() && which::which(path).is_ok()
}
