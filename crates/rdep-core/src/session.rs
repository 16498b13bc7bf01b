//! The session facade: one long-lived resolver context per host process.
//!
//! A session owns the repository chain, the virtual module descriptor, the
//! active conflict policy, the artifact cache and the loaded-artifact ledger.
//! Declarations accumulate across calls; each [`Session::resolve`] works on a
//! snapshot of them, and [`Session::register`] records what the host loaded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rdep_schema::{
    ArtifactDownloadResult, CoordinateError, Dependency, ModuleId, RepositoryEndpoint,
    RepositoryLayout, ResolveReport, Revision,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::ArtifactCache;
use crate::chain::{DuplicateRepositoryError, RepositoryChain};
use crate::config::SessionConfig;
use crate::descriptor::{OverrideMediator, VirtualModuleDescriptor};
use crate::io::transport::{HttpTransport, RequestGuard, Transport, TransportError};
use crate::ledger::LoadedArtifactLedger;
use crate::policy::ConflictPolicy;
use crate::reporter::{NullReporter, Reporter};
use crate::resolver::{DescriptorError, ResolveError, ResolveSettings, Resolver};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    DuplicateRepository(#[from] DuplicateRepositoryError),
}

/// Per-call resolution options.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Cancelling this token aborts the resolution.
    pub cancel: CancellationToken,
    /// Per-request timeout; the session default when `None`.
    pub timeout: Option<Duration>,
}

/// Releases the single-flight flag when the resolution ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    config: SessionConfig,
    chain: RepositoryChain,
    descriptor: Mutex<VirtualModuleDescriptor>,
    policy: Mutex<ConflictPolicy>,
    ledger: LoadedArtifactLedger,
    cache: ArtifactCache,
    transport: Arc<dyn Transport>,
    reporter: Arc<dyn Reporter>,
    busy: AtomicBool,
    resolved_generation: Mutex<Option<u64>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("chain", &self.chain)
            .field("ledger", &self.ledger.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A session talking HTTP(S) to its repositories.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the HTTP client cannot be built or the
    /// configured repositories repeat a name.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let transport = HttpTransport::with_user_agent(&config.user_agent)?;
        Ok(Self::with_transport(config, Arc::new(transport))?)
    }

    /// A session over a custom transport.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRepositoryError`] if the configured repositories
    /// repeat a name.
    pub fn with_transport(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, DuplicateRepositoryError> {
        let chain = if config.default_repositories {
            RepositoryChain::with_defaults()
        } else {
            RepositoryChain::new()
        };
        for endpoint in &config.repositories {
            chain.add_endpoint(endpoint.clone())?;
        }

        Ok(Self {
            cache: ArtifactCache::new(&config.cache_dir),
            policy: Mutex::new(config.policy),
            chain,
            descriptor: Mutex::new(VirtualModuleDescriptor::new()),
            ledger: LoadedArtifactLedger::new(),
            transport,
            reporter: Arc::new(NullReporter),
            busy: AtomicBool::new(false),
            resolved_generation: Mutex::new(None),
            config,
        })
    }

    /// Route progress events to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Append a repository at the lowest priority.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRepositoryError`] if the name is already taken.
    pub fn add_repository(
        &self,
        name: &str,
        url: &str,
        layout: RepositoryLayout,
    ) -> Result<(), DuplicateRepositoryError> {
        self.chain.add(name, url, layout)
    }

    /// Append a prepared endpoint at the lowest priority.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRepositoryError`] if the name is already taken.
    pub fn add_endpoint(&self, endpoint: RepositoryEndpoint) -> Result<(), DuplicateRepositoryError> {
        self.chain.add_endpoint(endpoint)
    }

    /// The repository chain in priority order.
    pub fn repositories(&self) -> Vec<RepositoryEndpoint> {
        self.chain.list_endpoints()
    }

    /// Declare a dependency from Maven coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] for malformed coordinates; nothing is added.
    pub fn add_dependency(&self, coords: &str) -> Result<Dependency, CoordinateError> {
        let dependency = Dependency::parse(coords)?;
        self.add_declaration(dependency.clone())?;
        Ok(dependency)
    }

    /// Declare a prepared dependency.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if any component is invalid; nothing is added.
    pub fn add_declaration(&self, dependency: Dependency) -> Result<(), CoordinateError> {
        dependency.validate()?;
        tracing::debug!("Declared {dependency}");
        lock(&self.descriptor).add_direct_dependency(dependency);
        Ok(())
    }

    /// Pin `module` to `revision` for every edge in the graph.
    ///
    /// A later pin for the same module replaces the earlier one; the replaced
    /// revision is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if the module or revision is malformed.
    pub fn add_override(
        &self,
        module: ModuleId,
        revision: &str,
    ) -> Result<Option<Revision>, CoordinateError> {
        module.validate()?;
        let revision = Revision::parse(revision)?;
        let label = format!("{module}:{revision}");
        let previous = lock(&self.descriptor).add_override(OverrideMediator::new(module, revision.clone()));
        if let Some(prev) = &previous {
            if prev != &revision {
                tracing::warn!("Override {label} replaces earlier pin {prev}");
            }
        }
        Ok(previous)
    }

    /// Switch the conflict policy for subsequent resolutions; returns the old one.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) -> ConflictPolicy {
        std::mem::replace(&mut *lock(&self.policy), policy)
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        *lock(&self.policy)
    }

    pub fn direct_dependencies(&self) -> Vec<Dependency> {
        lock(&self.descriptor)
            .dependencies()
            .iter()
            .map(|d| d.dependency.clone())
            .collect()
    }

    pub fn overrides(&self) -> Vec<OverrideMediator> {
        lock(&self.descriptor).overrides()
    }

    /// True if declarations changed since the last successful resolution.
    pub fn has_pending_changes(&self) -> bool {
        let current = lock(&self.descriptor).generation();
        *lock(&self.resolved_generation) != Some(current)
    }

    /// Resolve every declaration with default options.
    ///
    /// # Errors
    ///
    /// See [`ResolveError`].
    pub async fn resolve(&self) -> Result<ResolveReport, ResolveError> {
        self.resolve_with(ResolveOptions::default()).await
    }

    /// Resolve every declaration with a caller-supplied cancellation token
    /// and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Busy`] if another resolution is running and
    /// [`ResolveError::Descriptor`] if nothing is declared, both before any
    /// network access. See [`ResolveError`] for the rest.
    pub async fn resolve_with(&self, options: ResolveOptions) -> Result<ResolveReport, ResolveError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Err(ResolveError::Busy);
        };

        let descriptor = lock(&self.descriptor).snapshot();
        if descriptor.dependencies.is_empty() {
            return Err(DescriptorError::NoDependencies.into());
        }
        let generation = descriptor.generation;
        let settings = ResolveSettings {
            endpoints: self.chain.list_endpoints(),
            policy: self.conflict_policy(),
            descriptor,
            workers: self.config.workers,
        };
        let guard = RequestGuard::new(
            options.cancel,
            options.timeout.unwrap_or(self.config.timeout),
        );

        let report = Resolver::new(
            settings,
            self.transport.as_ref(),
            &self.cache,
            &self.ledger,
            self.reporter.as_ref(),
            guard,
        )
        .resolve()
        .await?;

        *lock(&self.resolved_generation) = Some(generation);
        Ok(report)
    }

    /// Record the report's artifacts in the ledger, in report order.
    ///
    /// Returns the entries that were not already loaded: exactly what the
    /// host still has to put on its class path.
    pub fn register(&self, report: &ResolveReport) -> Vec<ArtifactDownloadResult> {
        let fresh: Vec<ArtifactDownloadResult> = report
            .resolved_artifacts
            .iter()
            .filter(|artifact| self.ledger.record(artifact))
            .cloned()
            .collect();
        tracing::debug!("Registered {} new artifacts", fresh.len());
        fresh
    }

    /// Everything registered so far, in load order.
    pub fn loaded_artifacts(&self) -> Vec<ArtifactDownloadResult> {
        self.ledger.all()
    }

    pub fn ledger(&self) -> &LoadedArtifactLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig::with_home(dir.path());
        let session = Session::new(config).unwrap();
        (dir, session)
    }

    #[test]
    fn test_starts_with_default_chain_and_strict_policy() {
        let (_dir, session) = session();
        let names: Vec<String> = session.repositories().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["central", "jcenter", "jboss", "atlassian"]);
        assert_eq!(session.conflict_policy(), ConflictPolicy::Strict);
    }

    #[test]
    fn test_duplicate_repository_rejected() {
        let (_dir, session) = session();
        let err = session
            .add_repository("central", "https://mirror.example.org/", RepositoryLayout::MAVEN)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot add repository with name central since it already exists"
        );
        assert_eq!(session.repositories().len(), 4);
    }

    #[test]
    fn test_bad_coordinates_are_not_added() {
        let (_dir, session) = session();
        assert!(session.add_dependency("org.example:").is_err());
        assert!(session.direct_dependencies().is_empty());
        session.add_dependency("org.example:lib:1.0").unwrap();
        assert_eq!(session.direct_dependencies().len(), 1);
        assert!(session.has_pending_changes());
    }

    #[test]
    fn test_override_replaces_previous_pin() {
        let (_dir, session) = session();
        let module = ModuleId::new("g", "a");
        assert_eq!(session.add_override(module.clone(), "1.0").unwrap(), None);
        assert_eq!(
            session.add_override(module, "2.0").unwrap(),
            Some(Revision::new("1.0"))
        );
        let overrides = session.overrides();
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].revision, Revision::new("2.0"));
    }

    #[test]
    fn test_policy_switch_returns_previous() {
        let (_dir, session) = session();
        assert_eq!(
            session.set_conflict_policy(ConflictPolicy::LatestRevision),
            ConflictPolicy::Strict
        );
        assert_eq!(session.conflict_policy(), ConflictPolicy::LatestRevision);
    }

    #[tokio::test]
    async fn test_empty_request_fails_before_network() {
        let (_dir, session) = session();
        let err = session.resolve().await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Descriptor(DescriptorError::NoDependencies)
        ));
    }

    #[test]
    fn test_busy_guard_is_single_flight() {
        let flag = AtomicBool::new(false);
        let first = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(first);
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
