//! On-disk artifact cache.
//!
//! Layout: `<root>/<group>/<artifact>/<revision>/<file>`. Each revision
//! directory may also hold the module's POM and an `origin.json` recording
//! which endpoint served it and when it was published.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rdep_schema::{ArtifactKey, ModuleId, Revision};
use serde::{Deserialize, Serialize};

const ORIGIN_FILE: &str = "origin.json";

/// Where a cached descriptor came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Endpoint name.
    pub repository: String,
    /// Publication time reported by the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
}

/// A descriptor read back from the cache.
#[derive(Debug, Clone)]
pub struct CachedDescriptor {
    pub text: String,
    pub origin: Origin,
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache root if needed.
    pub fn ensure_root(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    pub fn revision_dir(&self, module: &ModuleId, revision: &Revision) -> PathBuf {
        self.root
            .join(&module.group)
            .join(&module.artifact)
            .join(revision.as_str())
    }

    pub fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.revision_dir(&key.module, &key.revision)
            .join(key.file_name())
    }

    pub fn descriptor_path(&self, module: &ModuleId, revision: &Revision) -> PathBuf {
        self.revision_dir(module, revision)
            .join(format!("{}-{revision}.pom", module.artifact))
    }

    /// Size of the cached artifact file, if present.
    pub fn lookup(&self, key: &ArtifactKey) -> Option<u64> {
        std::fs::metadata(self.artifact_path(key))
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|m| m.len())
    }

    /// Read a cached descriptor and its origin marker.
    ///
    /// Returns `None` unless both files are present and readable; a descriptor
    /// without a marker is treated as not cached.
    pub fn read_descriptor(&self, module: &ModuleId, revision: &Revision) -> Option<CachedDescriptor> {
        let dir = self.revision_dir(module, revision);
        let origin_text = std::fs::read_to_string(dir.join(ORIGIN_FILE)).ok()?;
        let origin: Origin = match serde_json::from_str(&origin_text) {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!("Ignoring unreadable origin marker for {module}:{revision}: {e}");
                return None;
            }
        };
        let text = std::fs::read_to_string(self.descriptor_path(module, revision)).ok()?;
        Some(CachedDescriptor { text, origin })
    }

    /// Store a descriptor and its origin marker.
    pub fn store_descriptor(
        &self,
        module: &ModuleId,
        revision: &Revision,
        text: &str,
        origin: &Origin,
    ) -> std::io::Result<()> {
        let dir = self.revision_dir(module, revision);
        std::fs::create_dir_all(&dir)?;
        write_atomic(&self.descriptor_path(module, revision), text.as_bytes())?;
        let marker = serde_json::to_vec_pretty(origin).map_err(std::io::Error::other)?;
        write_atomic(&dir.join(ORIGIN_FILE), &marker)
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
