//! Remote repository endpoints and their URL layouts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::module::{ArtifactKey, ModuleId};
use crate::revision::Revision;

/// Layout and lookup flags of a repository endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryLayout {
    /// Maven 2 directory layout (`group/path/artifact/rev/...`). When false
    /// the legacy Maven 1 layout (`group/<ext>s/artifact-rev.ext`) is used.
    pub maven: bool,
    /// Whether `maven-metadata.xml` is consulted to list revisions.
    pub metadata: bool,
    /// Whether POM descriptors are fetched for transitive dependencies.
    pub descriptors: bool,
}

impl RepositoryLayout {
    /// Maven 2 layout with metadata and POM lookups, as used by Maven Central.
    pub const MAVEN: Self = Self {
        maven: true,
        metadata: true,
        descriptors: true,
    };

    /// Whether revision listings can be fetched from this layout.
    pub fn lists_revisions(&self) -> bool {
        self.maven && self.metadata
    }
}

impl Default for RepositoryLayout {
    fn default() -> Self {
        Self::MAVEN
    }
}

/// A single named remote source of packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEndpoint {
    /// Unique name within a chain (e.g. `central`).
    pub name: String,
    /// Root URL, always ending in `/`.
    pub base_url: String,
    /// URL layout and lookup flags.
    pub layout: RepositoryLayout,
}

impl RepositoryEndpoint {
    /// Create an endpoint, normalizing the base URL to end with `/`.
    pub fn new(name: impl Into<String>, base_url: &str, layout: RepositoryLayout) -> Self {
        let trimmed = base_url.trim();
        let base_url = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        Self {
            name: name.into(),
            base_url,
            layout,
        }
    }

    /// A Maven 2 repository with metadata and POM lookups enabled.
    pub fn maven(name: impl Into<String>, base_url: &str) -> Self {
        Self::new(name, base_url, RepositoryLayout::MAVEN)
    }

    fn module_dir(&self, module: &ModuleId) -> String {
        format!(
            "{}{}/{}/",
            self.base_url,
            module.group.replace('.', "/"),
            module.artifact
        )
    }

    /// URL of `maven-metadata.xml` for a module, if this layout has one.
    pub fn metadata_url(&self, module: &ModuleId) -> Option<String> {
        self.layout
            .lists_revisions()
            .then(|| format!("{}maven-metadata.xml", self.module_dir(module)))
    }

    /// URL of the POM descriptor for `module` at `revision`.
    pub fn descriptor_url(&self, module: &ModuleId, revision: &Revision) -> String {
        if self.layout.maven {
            format!(
                "{}{revision}/{}-{revision}.pom",
                self.module_dir(module),
                module.artifact
            )
        } else {
            format!(
                "{}{}/poms/{}-{revision}.pom",
                self.base_url, module.group, module.artifact
            )
        }
    }

    /// URL of an artifact file.
    pub fn artifact_url(&self, key: &ArtifactKey) -> String {
        if self.layout.maven {
            format!(
                "{}{}/{}",
                self.module_dir(&key.module),
                key.revision,
                key.file_name()
            )
        } else {
            format!(
                "{}{}/{}s/{}",
                self.base_url,
                key.module.group,
                key.extension,
                key.file_name()
            )
        }
    }
}

impl fmt::Display for RepositoryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.base_url)
    }
}
