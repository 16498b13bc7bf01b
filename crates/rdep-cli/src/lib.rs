//! rdep - runtime dependency resolver
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Resolves Maven coordinates against a chain of repositories and hands the
//! resulting jars to whoever is loading them.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.rdep/
//! ├── config.toml   # Optional repositories, policy, workers, timeout
//! └── cache/        # Descriptors and artifacts by group/artifact/revision
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rdep_core::schema::{ModuleId, RepositoryEndpoint};
use rdep_core::{ConflictPolicy, SessionConfig};

pub use rdep_core::USER_AGENT;

#[derive(Debug, Parser)]
#[command(name = "rdep")]
#[command(author, version, about = "rdep - resolve Maven dependencies at runtime")]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that shape the session, shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct SessionArgs {
    /// Extra repository appended to the chain (repeatable)
    #[arg(long = "repo", value_name = "NAME=URL", global = true, value_parser = parse_repo)]
    pub repos: Vec<(String, String)>,

    /// Start from an empty chain instead of the public defaults
    #[arg(long, global = true)]
    pub no_default_repos: bool,

    /// Conflict policy: none, strict, latest-revision, latest-time, latest-compatible
    #[arg(long, global = true)]
    pub policy: Option<ConflictPolicy>,

    /// Artifact cache directory
    #[arg(long, value_name = "DIR", global = true)]
    pub cache: Option<PathBuf>,

    /// Concurrent downloads
    #[arg(long, value_name = "N", global = true, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve coordinates once and print the class path
    Resolve {
        /// Coordinates: group:artifact:version (or with extension/classifier)
        #[arg(required = true)]
        coords: Vec<String>,
        /// Pin a module to a revision: group:artifact:version (repeatable)
        #[arg(long = "override", value_name = "G:A:V")]
        overrides: Vec<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Read resolver commands line by line from stdin
    Session,
    /// List the effective repository chain
    Repos,
}

fn parse_repo(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
            Ok((name.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(format!("expected NAME=URL, got '{s}'")),
    }
}

/// Split `group:artifact:version` into a module and a revision string.
pub fn parse_pin(s: &str) -> Result<(ModuleId, String)> {
    let (module, revision) = s
        .trim()
        .rsplit_once(':')
        .with_context(|| format!("expected group:artifact:version, got '{s}'"))?;
    let module = ModuleId::parse(module).with_context(|| format!("Invalid override '{s}'"))?;
    Ok((module, revision.to_string()))
}

impl SessionArgs {
    /// Environment and config file, then these flags on top.
    pub fn config(&self) -> Result<SessionConfig> {
        let mut config = SessionConfig::from_env().context("Failed to load configuration")?;
        if let Some(cache) = &self.cache {
            config.cache_dir.clone_from(cache);
        }
        if let Some(workers) = self.workers {
            config.workers = usize::from(workers);
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if self.no_default_repos {
            config.default_repositories = false;
        }
        for (name, url) in &self.repos {
            config
                .repositories
                .push(RepositoryEndpoint::maven(name.as_str(), url));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo() {
        assert_eq!(
            parse_repo("internal=https://m2.example.org/").unwrap(),
            ("internal".to_string(), "https://m2.example.org/".to_string())
        );
        assert!(parse_repo("internal").is_err());
        assert!(parse_repo("=https://m2.example.org/").is_err());
    }

    #[test]
    fn test_parse_pin() {
        let (module, revision) = parse_pin("com.google.guava:guava:31.1-jre").unwrap();
        assert_eq!(module, ModuleId::new("com.google.guava", "guava"));
        assert_eq!(revision, "31.1-jre");
        assert!(parse_pin("guava").is_err());
    }

    #[test]
    fn test_cli_parses_resolve_flags() {
        let cli = Cli::parse_from([
            "rdep",
            "resolve",
            "org.example:lib:1.0",
            "--override",
            "g:a:2.0",
            "--policy",
            "latest-revision",
            "--repo",
            "local=http://localhost:8081/",
            "--workers",
            "2",
            "--json",
        ]);
        assert_eq!(cli.session.policy, Some(ConflictPolicy::LatestRevision));
        assert_eq!(cli.session.workers, Some(2));
        assert_eq!(cli.session.repos.len(), 1);
        match cli.command {
            Commands::Resolve {
                coords,
                overrides,
                json,
            } => {
                assert_eq!(coords, vec!["org.example:lib:1.0"]);
                assert_eq!(overrides, vec!["g:a:2.0"]);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(Cli::try_parse_from(["rdep", "repos", "--workers", "0"]).is_err());
    }
}
