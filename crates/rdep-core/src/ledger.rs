//! Session-scoped record of artifacts already handed to the host.
//!
//! Entries are only ever added. Recording a key twice is a no-op, so the
//! first path registered for an artifact stays authoritative.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rdep_schema::{ArtifactDownloadResult, ArtifactKey};

#[derive(Debug, Default)]
struct Entries {
    ordered: Vec<ArtifactDownloadResult>,
    index: HashMap<ArtifactKey, usize>,
}

/// Append-only set of loaded artifacts, keyed by [`ArtifactKey`].
#[derive(Debug, Default)]
pub struct LoadedArtifactLedger {
    entries: Mutex<Entries>,
}

impl LoadedArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // Only pushes happen under the lock; a poisoned guard is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an artifact. Returns `false` if its key was already present.
    pub fn record(&self, artifact: &ArtifactDownloadResult) -> bool {
        let key = artifact.key();
        let mut entries = self.lock();
        if entries.index.contains_key(&key) {
            return false;
        }
        let position = entries.ordered.len();
        entries.ordered.push(artifact.clone());
        entries.index.insert(key, position);
        true
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.lock().index.contains_key(key)
    }

    /// The recorded entry for `key`.
    pub fn get(&self, key: &ArtifactKey) -> Option<ArtifactDownloadResult> {
        let entries = self.lock();
        entries
            .index
            .get(key)
            .map(|&i| entries.ordered[i].clone())
    }

    /// All entries in registration order.
    pub fn all(&self) -> Vec<ArtifactDownloadResult> {
        self.lock().ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ordered.is_empty()
    }
}
