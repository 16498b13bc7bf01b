//! Resolve reports and their diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::module::{ArtifactKey, ModuleId};
use crate::revision::Revision;

/// How an artifact became available for this resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Fetched from the origin repository during this resolution.
    Downloaded,
    /// Already present in the on-disk cache from an earlier run.
    Cached,
    /// Already recorded in this session's ledger; nothing was touched.
    Loaded,
}

/// One materialized artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDownloadResult {
    /// Module identity.
    pub module: ModuleId,
    /// Selected revision.
    pub revision: Revision,
    /// Classifier, if this is not the primary artifact.
    pub classifier: Option<String>,
    /// File extension.
    pub extension: String,
    /// Location of the file in the local cache.
    pub local_path: PathBuf,
    /// Name of the repository endpoint the module was resolved from.
    pub origin: String,
    /// File size in bytes.
    pub size: u64,
    /// Whether the file was downloaded, found in cache, or already loaded.
    pub status: DownloadStatus,
    /// SHA-256 of the file, when it was downloaded by this resolution.
    pub sha256: Option<String>,
}

impl ArtifactDownloadResult {
    /// The ledger key of this artifact.
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            module: self.module.clone(),
            revision: self.revision.clone(),
            classifier: self.classifier.clone(),
            extension: self.extension.clone(),
        }
    }
}

/// Severity of a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; resolution still produced what was asked.
    Warning,
    /// Something requested could not be provided.
    Error,
}

/// What went wrong (or was noteworthy) for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// No endpoint in the chain has the module.
    NotFound,
    /// An endpoint could not be reached.
    Transport,
    /// A descriptor or coordinate could not be understood.
    Descriptor,
    /// The conflict policy rejected competing revisions.
    Conflict,
    /// An artifact file could not be downloaded.
    Download,
    /// No candidate satisfied every direct constraint; the latest was used.
    Incompatible,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::Transport => "transport",
            Self::Descriptor => "descriptor",
            Self::Conflict => "conflict",
            Self::Download => "download",
            Self::Incompatible => "incompatible",
        };
        write!(f, "{s}")
    }
}

/// A single problem found during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Warning or error.
    pub severity: Severity,
    /// Category.
    pub kind: DiagnosticKind,
    /// Module the diagnostic is about, if any.
    pub module: Option<ModuleId>,
    /// Human-readable description.
    pub message: String,
    /// Endpoints that were queried, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    /// Conflict policy involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl Diagnostic {
    /// An error-severity diagnostic.
    pub fn error(kind: DiagnosticKind, module: Option<ModuleId>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            module,
            message: message.into(),
            endpoints: Vec::new(),
            policy: None,
        }
    }

    /// A warning-severity diagnostic.
    pub fn warning(
        kind: DiagnosticKind,
        module: Option<ModuleId>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, module, message)
        }
    }

    /// Attach the endpoints that were tried.
    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Attach the conflict policy involved.
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(module) = &self.module {
            write!(f, "{module}: ")?;
        }
        write!(f, "{}", self.message)?;
        if !self.endpoints.is_empty() {
            write!(f, " (tried: {})", self.endpoints.join(", "))?;
        }
        if let Some(policy) = &self.policy {
            write!(f, " [policy: {policy}]")?;
        }
        Ok(())
    }
}

/// Result of one resolution call. Never mutated after it is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    /// Artifacts available for loading, sorted by module identity.
    pub resolved_artifacts: Vec<ArtifactDownloadResult>,
    /// Modules no endpoint could provide.
    pub unresolved_modules: BTreeSet<ModuleId>,
    /// Modules whose competing revisions the policy refused to choose between.
    pub conflicts: BTreeMap<ModuleId, Vec<Revision>>,
    /// Every problem found, in discovery order.
    pub errors: Vec<Diagnostic>,
}

impl ResolveReport {
    /// True when nothing was unresolved, conflicting or failed.
    pub fn is_success(&self) -> bool {
        self.unresolved_modules.is_empty()
            && self.conflicts.is_empty()
            && !self.errors.iter().any(|d| d.severity == Severity::Error)
    }

    /// Paths of every resolved artifact, in report order.
    pub fn artifact_paths(&self) -> impl Iterator<Item = &Path> {
        self.resolved_artifacts.iter().map(|a| a.local_path.as_path())
    }

    /// Resolved artifacts of one module.
    pub fn artifacts_for<'a>(
        &'a self,
        module: &'a ModuleId,
    ) -> impl Iterator<Item = &'a ArtifactDownloadResult> + 'a {
        self.resolved_artifacts
            .iter()
            .filter(move |a| &a.module == module)
    }

    /// Distinct revisions resolved for a module.
    pub fn revisions_of(&self, module: &ModuleId) -> BTreeSet<Revision> {
        self.artifacts_for(module)
            .map(|a| a.revision.clone())
            .collect()
    }

    /// Number of artifacts that had to be downloaded.
    pub fn downloaded_count(&self) -> usize {
        self.resolved_artifacts
            .iter()
            .filter(|a| a.status == DownloadStatus::Downloaded)
            .count()
    }
}
