//! Shared types for rdep.
//!
//! Everything in this crate is plain data: module coordinates, revision
//! ordering and constraints, repository endpoints and the report produced by
//! a resolution. No I/O happens here.

pub mod module;
pub mod report;
pub mod repository;
pub mod revision;

// Re-exports
pub use module::{ArtifactKey, CoordinateError, Dependency, ModuleId};
pub use report::{
    ArtifactDownloadResult, Diagnostic, DiagnosticKind, DownloadStatus, ResolveReport, Severity,
};
pub use repository::{RepositoryEndpoint, RepositoryLayout};
pub use revision::{Revision, RevisionConstraint};

/// Extension used when a declaration does not name one.
pub const DEFAULT_EXTENSION: &str = "jar";
