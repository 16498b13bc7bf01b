//! Session configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the optional
//! `$RDEP_HOME/config.toml`, then `RDEP_*` environment variables. Front-ends
//! apply their own flags on top of the returned value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rdep_schema::{RepositoryEndpoint, RepositoryLayout};
use serde::Deserialize;
use thiserror::Error;

use crate::paths;
use crate::policy::ConflictPolicy;

/// Default size of the network worker pool.
pub const DEFAULT_WORKERS: usize = 4;
/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Everything a [`Session`](crate::Session) needs to start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cache_dir: PathBuf,
    /// Upper bound on concurrent descriptor fetches and downloads.
    pub workers: usize,
    /// Per-request network timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Install the built-in repository chain ahead of `repositories`.
    pub default_repositories: bool,
    /// Extra endpoints appended after the defaults.
    pub repositories: Vec<RepositoryEndpoint>,
    pub policy: ConflictPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::with_home(&paths::rdep_home())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    cache_dir: Option<PathBuf>,
    workers: Option<usize>,
    timeout_secs: Option<u64>,
    policy: Option<String>,
    default_repositories: Option<bool>,
    repositories: Vec<FileRepository>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRepository {
    name: String,
    url: String,
    #[serde(default = "yes")]
    maven: bool,
    #[serde(default = "yes")]
    metadata: bool,
    #[serde(default = "yes")]
    descriptors: bool,
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(invalid(key, value));
    }
    Ok(value)
}

impl SessionConfig {
    /// Defaults rooted at `home`.
    pub fn with_home(home: &Path) -> Self {
        Self {
            cache_dir: home.join("cache"),
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            user_agent: crate::USER_AGENT.to_string(),
            default_repositories: true,
            repositories: Vec::new(),
            policy: ConflictPolicy::default(),
        }
    }

    /// Load configuration from the config file and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the config file exists but cannot be read
    /// or parsed, or a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) with an injectable variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home = paths::resolve_home(lookup("RDEP_HOME")).unwrap_or_else(|| PathBuf::from(".rdep"));
        let mut config = Self::with_home(&home);

        let file = home.join("config.toml");
        if file.is_file() {
            config.apply_file(&file)?;
        }

        if let Some(cache) = lookup("RDEP_CACHE").filter(|v| !v.is_empty()) {
            config.cache_dir = PathBuf::from(cache);
        }
        if let Some(workers) = lookup("RDEP_WORKERS") {
            let n = workers
                .trim()
                .parse()
                .map_err(|_| invalid("RDEP_WORKERS", &workers))?;
            config.workers = positive("RDEP_WORKERS", n)?;
        }
        if let Some(secs) = lookup("RDEP_TIMEOUT_SECS") {
            let n: u64 = secs
                .trim()
                .parse()
                .map_err(|_| invalid("RDEP_TIMEOUT_SECS", &secs))?;
            config.timeout = Duration::from_secs(n);
        }

        Ok(config)
    }

    /// Layer a TOML config file over this configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, is not valid
    /// TOML, or holds an invalid value.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(dir) = file.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(workers) = file.workers {
            self.workers = positive("workers", workers)?;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = file.policy {
            self.policy = policy.parse().map_err(|_| invalid("policy", &policy))?;
        }
        if let Some(defaults) = file.default_repositories {
            self.default_repositories = defaults;
        }
        for repo in file.repositories {
            let layout = RepositoryLayout {
                maven: repo.maven,
                metadata: repo.metadata,
                descriptors: repo.descriptors,
            };
            self.repositories
                .push(RepositoryEndpoint::new(repo.name, &repo.url, layout));
        }
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let config = SessionConfig::from_lookup(lookup(&[("RDEP_HOME", &home)])).unwrap();
        assert_eq!(config.cache_dir, dir.path().join("cache"));
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.policy, ConflictPolicy::Strict);
        assert!(config.default_repositories);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
workers = 2
timeout_secs = 5
policy = "latest-revision"
default_repositories = false

[[repositories]]
name = "internal"
url = "https://maven.internal.example.org/releases"
metadata = false
"#,
        )
        .unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let config = SessionConfig::from_lookup(lookup(&[
            ("RDEP_HOME", &home),
            ("RDEP_WORKERS", "8"),
            ("RDEP_CACHE", "/var/cache/rdep"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.policy, ConflictPolicy::LatestRevision);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/rdep"));
        assert!(!config.default_repositories);
        assert_eq!(config.repositories.len(), 1);
        assert_eq!(
            config.repositories[0].base_url,
            "https://maven.internal.example.org/releases/"
        );
        assert!(!config.repositories[0].layout.metadata);
        assert!(config.repositories[0].layout.descriptors);
    }

    #[test]
    fn test_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_string_lossy().into_owned();
        let err = SessionConfig::from_lookup(lookup(&[("RDEP_HOME", &home), ("RDEP_WORKERS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        std::fs::write(dir.path().join("config.toml"), "policy = \"newest\"").unwrap();
        let err = SessionConfig::from_lookup(lookup(&[("RDEP_HOME", &home)])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for policy: newest");

        std::fs::write(dir.path().join("config.toml"), "workers = [").unwrap();
        let err = SessionConfig::from_lookup(lookup(&[("RDEP_HOME", &home)])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
