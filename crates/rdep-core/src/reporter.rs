//! Reporter trait for dependency injection
//!
//! Lets the resolver report progress without being coupled to a terminal.
//! Every method has a no-op default so front-ends implement only what they show.

use rdep_schema::{ModuleId, Revision};

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Resolving", "Downloading").
    fn section(&self, _title: &str) {}

    /// A module's descriptor is being looked up.
    fn resolving(&self, _module: &ModuleId, _revision: &Revision) {}

    /// An artifact download has started.
    fn downloading(&self, _module: &ModuleId, _revision: &Revision, _file: &str) {}

    /// An artifact is available locally.
    fn done(&self, _module: &ModuleId, _revision: &Revision, _detail: &str, _size: Option<u64>) {}

    /// An operation for a module failed.
    fn failed(&self, _module: &ModuleId, _reason: &str) {}

    /// A non-fatal problem.
    fn warning(&self, _msg: &str) {}

    /// Final summary of a resolution.
    fn summary(&self, _resolved: usize, _downloaded: usize, _elapsed_secs: f64) {}
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn resolving(&self, module: &ModuleId, revision: &Revision) {
        (**self).resolving(module, revision);
    }
    fn downloading(&self, module: &ModuleId, revision: &Revision, file: &str) {
        (**self).downloading(module, revision, file);
    }
    fn done(&self, module: &ModuleId, revision: &Revision, detail: &str, size: Option<u64>) {
        (**self).done(module, revision, detail, size);
    }
    fn failed(&self, module: &ModuleId, reason: &str) {
        (**self).failed(module, reason);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn summary(&self, resolved: usize, downloaded: usize, elapsed_secs: f64) {
        (**self).summary(resolved, downloaded, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., library use, testing).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {}
