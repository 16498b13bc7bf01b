//! Resolver engine.
//!
//! Resolution works on an immutable snapshot of the session (endpoints,
//! policy, direct dependencies, overrides) and runs to a fixpoint:
//!
//! 1. Walk the graph from the direct dependencies, substituting overrides on
//!    every edge and following only the revisions currently selected.
//! 2. Anything the walk could not see yet (unresolved dynamic constraints,
//!    unloaded descriptors) is fetched in parallel and the walk is repeated.
//! 3. Once the walk is complete, the conflict policy decides every module.
//!    If the decisions changed, the walk is repeated with them.
//!
//! The selected revisions are then materialized into the cache and the
//! report is assembled in module order.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use rdep_schema::{
    ArtifactDownloadResult, ArtifactKey, CoordinateError, DEFAULT_EXTENSION, Dependency,
    Diagnostic, DiagnosticKind, DownloadStatus, ModuleId, RepositoryEndpoint, ResolveReport,
    Revision, RevisionConstraint,
};
use thiserror::Error;

use crate::cache::{ArtifactCache, Origin};
use crate::chain::{Attempt, AttemptOutcome, ChainOutcome, query_chain};
use crate::descriptor::{DEFAULT_CONFIGURATION, DescriptorSnapshot, accepts_scope};
use crate::io::download::{DownloadError, DownloadRequest};
use crate::io::transport::{Cancelled, FetchError, RequestGuard, Transport};
use crate::ledger::LoadedArtifactLedger;
use crate::metadata::ModuleMetadata;
use crate::policy::{Candidate, ConflictPolicy};
use crate::pom::{Exclusion, MAX_PARENT_DEPTH, PomError, PomModel, RawPom};
use crate::reporter::Reporter;

/// Rounds of walk-and-decide before the current decisions are accepted as final.
const MAX_ROUNDS: usize = 32;

/// Why a resolution call failed as a whole.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid dependency declaration: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("All repositories unreachable for {module} (tried: {})", .endpoints.join(", "))]
    Transport {
        module: ModuleId,
        endpoints: Vec<String>,
    },

    #[error("A resolution is already in progress for this session")]
    Busy,

    #[error("Resolution cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Cancelled> for ResolveError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// The request as a whole cannot be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("no dependencies declared")]
    NoDependencies,

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}

/// Everything one resolution reads from the session, captured up front.
#[derive(Debug, Clone)]
pub struct ResolveSettings {
    pub endpoints: Vec<RepositoryEndpoint>,
    pub policy: ConflictPolicy,
    pub descriptor: DescriptorSnapshot,
    pub workers: usize,
}

#[derive(Debug, Clone)]
struct Failure {
    kind: DiagnosticKind,
    message: String,
    endpoints: Vec<String>,
    unreachable: bool,
}

impl Failure {
    fn from_attempts(what: &str, attempts: &[Attempt], unreachable: bool) -> Self {
        let endpoints = attempts.iter().map(|a| a.endpoint.clone()).collect();
        let reasons: Vec<String> = attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Failed(reason) => Some(format!("{}: {reason}", a.endpoint)),
                AttemptOutcome::NotFound => None,
            })
            .collect();
        let (kind, message) = if unreachable {
            (
                DiagnosticKind::Transport,
                format!("{what} could not be fetched: {}", reasons.join("; ")),
            )
        } else if reasons.is_empty() {
            (DiagnosticKind::NotFound, format!("{what} not found"))
        } else {
            (
                DiagnosticKind::Transport,
                format!(
                    "{what} not found on the repositories that answered ({} failed: {})",
                    reasons.len(),
                    reasons.join("; ")
                ),
            )
        };
        Self {
            kind,
            message,
            endpoints,
            unreachable,
        }
    }

    fn descriptor(what: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            kind: DiagnosticKind::Descriptor,
            message: format!("{what}: {reason}"),
            endpoints: Vec::new(),
            unreachable: false,
        }
    }

    fn to_diagnostic(&self, module: &ModuleId, error: bool) -> Diagnostic {
        let diag = if error {
            Diagnostic::error(self.kind, Some(module.clone()), &self.message)
        } else {
            Diagnostic::warning(self.kind, Some(module.clone()), &self.message)
        };
        diag.with_endpoints(self.endpoints.clone())
    }
}

/// A descriptor (or probed artifact) found on an endpoint.
#[derive(Debug)]
struct Document {
    text: Option<String>,
    priority: usize,
    published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Edge {
    module: ModuleId,
    constraint: RevisionConstraint,
    exclusions: Vec<Exclusion>,
}

#[derive(Debug)]
struct Node {
    priority: usize,
    origin: String,
    published: Option<DateTime<Utc>>,
    primary_extension: Option<String>,
    edges: Vec<Edge>,
}

#[derive(Debug, Clone)]
enum RequestState {
    Resolved(Revision),
    Failed(Failure),
}

#[derive(Debug, Clone)]
enum NodeState {
    Loaded(Arc<Node>),
    Failed(Failure),
}

type RequestKey = (ModuleId, RevisionConstraint);
type NodeKey = (ModuleId, Revision);

#[derive(Default)]
struct Graph {
    requests: HashMap<RequestKey, RequestState>,
    nodes: HashMap<NodeKey, NodeState>,
}

impl Graph {
    fn revision_for(&self, module: &ModuleId, constraint: &RevisionConstraint) -> Option<Revision> {
        if let Some(exact) = constraint.exact_revision() {
            return Some(exact.clone());
        }
        match self.requests.get(&(module.clone(), constraint.clone())) {
            Some(RequestState::Resolved(r)) => Some(r.clone()),
            _ => None,
        }
    }

    fn loaded(&self, module: &ModuleId, revision: &Revision) -> Option<&Arc<Node>> {
        match self.nodes.get(&(module.clone(), revision.clone())) {
            Some(NodeState::Loaded(node)) => Some(node),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    Selected {
        winners: Vec<Revision>,
        note: Option<String>,
    },
    Conflict(Vec<Revision>),
}

impl Decision {
    fn selects(&self, revision: &Revision) -> bool {
        matches!(self, Self::Selected { winners, .. } if winners.contains(revision))
    }
}

#[derive(Default)]
struct Walk {
    pending_requests: HashSet<RequestKey>,
    pending_nodes: HashSet<NodeKey>,
    /// Concrete revisions requested per module.
    candidates: BTreeMap<ModuleId, BTreeSet<Revision>>,
    failures: BTreeMap<ModuleId, Vec<Failure>>,
}

impl Walk {
    fn is_complete(&self) -> bool {
        self.pending_requests.is_empty() && self.pending_nodes.is_empty()
    }

    fn fail(&mut self, module: &ModuleId, failure: &Failure) {
        let failures = self.failures.entry(module.clone()).or_default();
        if !failures.iter().any(|f| f.message == failure.message) {
            failures.push(failure.clone());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One resolution call.
pub struct Resolver<'a> {
    settings: ResolveSettings,
    transport: &'a dyn Transport,
    cache: &'a ArtifactCache,
    ledger: &'a LoadedArtifactLedger,
    reporter: &'a dyn Reporter,
    guard: RequestGuard,
    documents: Mutex<HashMap<NodeKey, Arc<Document>>>,
    models: Mutex<HashMap<NodeKey, Arc<PomModel>>>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        settings: ResolveSettings,
        transport: &'a dyn Transport,
        cache: &'a ArtifactCache,
        ledger: &'a LoadedArtifactLedger,
        reporter: &'a dyn Reporter,
        guard: RequestGuard,
    ) -> Self {
        Self {
            settings,
            transport,
            cache,
            ledger,
            reporter,
            guard,
            documents: Mutex::new(HashMap::new()),
            models: Mutex::new(HashMap::new()),
        }
    }

    fn direct(&self) -> &[Dependency] {
        &self.settings.descriptor.dependencies
    }

    fn direct_for<'s>(&'s self, module: &'s ModuleId) -> impl Iterator<Item = &'s Dependency> + 's {
        self.direct().iter().filter(move |d| &d.module == module)
    }

    fn workers(&self) -> usize {
        self.settings.workers.max(1)
    }

    /// Run the resolution.
    ///
    /// # Errors
    ///
    /// See [`ResolveError`]. Per-module failures do not abort the call; they
    /// are reported in [`ResolveReport::errors`].
    pub async fn resolve(mut self) -> Result<ResolveReport, ResolveError> {
        let started = Instant::now();
        let mut report = ResolveReport::default();

        let declared = std::mem::take(&mut self.settings.descriptor.dependencies);
        if declared.is_empty() {
            return Err(DescriptorError::NoDependencies.into());
        }
        let mut first_invalid = None;
        for dep in declared {
            match dep.validate() {
                Ok(()) => self.settings.descriptor.dependencies.push(dep),
                Err(e) => {
                    report.errors.push(Diagnostic::error(
                        DiagnosticKind::Descriptor,
                        Some(dep.module.clone()),
                        e.to_string(),
                    ));
                    first_invalid.get_or_insert(e);
                }
            }
        }
        if self.direct().is_empty() {
            if let Some(e) = first_invalid {
                return Err(DescriptorError::Coordinate(e).into());
            }
        }
        self.cache.ensure_root()?;

        tracing::debug!(
            "Resolving {} direct dependencies against {} repositories with policy {}",
            self.direct().len(),
            self.settings.endpoints.len(),
            self.settings.policy
        );
        self.reporter.section("Resolving");

        let mut graph = Graph::default();
        let mut decisions: HashMap<ModuleId, Decision> = HashMap::new();
        let mut rounds = 0;
        let walk = loop {
            if self.guard.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            let walk = self.walk(&graph, &decisions);
            if !walk.is_complete() {
                self.load_pending(&mut graph, walk).await?;
                continue;
            }
            let next = self.decide(&graph, &walk);
            if next == decisions {
                break walk;
            }
            rounds += 1;
            if rounds >= MAX_ROUNDS {
                tracing::warn!("Conflict resolution did not settle after {MAX_ROUNDS} rounds");
                break walk;
            }
            decisions = next;
        };

        self.check_reachable(&walk, &decisions)?;

        let mut wanted: Vec<(ArtifactKey, Arc<Node>)> = Vec::new();
        let modules: BTreeSet<&ModuleId> = walk.candidates.keys().chain(walk.failures.keys()).collect();
        let no_failures = Vec::new();
        for module in modules {
            let failures = walk.failures.get(module).unwrap_or(&no_failures);
            match decisions.get(module) {
                Some(Decision::Conflict(revisions)) => {
                    let listed: Vec<&str> = revisions.iter().map(Revision::as_str).collect();
                    report.errors.push(
                        Diagnostic::error(
                            DiagnosticKind::Conflict,
                            Some(module.clone()),
                            format!("conflicting revisions requested: {}", listed.join(", ")),
                        )
                        .with_policy(self.settings.policy.as_str()),
                    );
                    self.reporter.failed(module, "conflict");
                    report.conflicts.insert(module.clone(), revisions.clone());
                }
                Some(Decision::Selected { winners, note }) => {
                    if let Some(note) = note {
                        report.errors.push(
                            Diagnostic::warning(
                                DiagnosticKind::Incompatible,
                                Some(module.clone()),
                                note,
                            )
                            .with_policy(self.settings.policy.as_str()),
                        );
                    }
                    for failure in failures {
                        report.errors.push(failure.to_diagnostic(module, false));
                    }
                    for winner in winners {
                        if let Some(node) = graph.loaded(module, winner) {
                            for key in self.artifact_keys(module, winner, node) {
                                wanted.push((key, Arc::clone(node)));
                            }
                        }
                    }
                }
                None => {
                    for failure in failures {
                        report.errors.push(failure.to_diagnostic(module, true));
                    }
                    self.reporter.failed(module, "unresolved");
                    report.unresolved_modules.insert(module.clone());
                }
            }
        }

        self.reporter.section("Downloading");
        let this = &self;
        let fetched: Vec<Result<Result<ArtifactDownloadResult, Diagnostic>, Cancelled>> =
            stream::iter(wanted)
                .map(move |(key, node)| async move { this.materialize(key, &node).await })
                .buffer_unordered(self.workers())
                .collect()
                .await;

        let mut download_errors = Vec::new();
        for result in fetched {
            match result? {
                Ok(artifact) => report.resolved_artifacts.push(artifact),
                Err(diag) => download_errors.push(diag),
            }
        }
        download_errors.sort_by(|a, b| a.module.cmp(&b.module).then_with(|| a.message.cmp(&b.message)));
        report.errors.extend(download_errors);
        report
            .resolved_artifacts
            .sort_by_cached_key(ArtifactDownloadResult::key);

        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(
            "Resolved {} artifacts ({} downloaded, {} unresolved, {} conflicts) in {elapsed:.2}s",
            report.resolved_artifacts.len(),
            report.downloaded_count(),
            report.unresolved_modules.len(),
            report.conflicts.len()
        );
        self.reporter.summary(
            report.resolved_artifacts.len(),
            report.downloaded_count(),
            elapsed,
        );
        Ok(report)
    }

    /// Fail the call if a direct dependency could not be looked up because
    /// every endpoint was unreachable.
    fn check_reachable(
        &self,
        walk: &Walk,
        decisions: &HashMap<ModuleId, Decision>,
    ) -> Result<(), ResolveError> {
        for dep in self.direct() {
            if decisions.contains_key(&dep.module) {
                continue;
            }
            let Some(failures) = walk.failures.get(&dep.module) else {
                continue;
            };
            if !failures.is_empty() && failures.iter().all(|f| f.unreachable) {
                let mut endpoints: Vec<String> = Vec::new();
                for name in failures.iter().flat_map(|f| f.endpoints.iter()) {
                    if !endpoints.contains(name) {
                        endpoints.push(name.clone());
                    }
                }
                return Err(ResolveError::Transport {
                    module: dep.module.clone(),
                    endpoints,
                });
            }
        }
        Ok(())
    }

    fn walk(&self, graph: &Graph, decisions: &HashMap<ModuleId, Decision>) -> Walk {
        let overrides = &self.settings.descriptor.overrides;
        let mut walk = Walk::default();
        let mut expanded: HashSet<NodeKey> = HashSet::new();
        let mut queue: VecDeque<(ModuleId, RevisionConstraint, Arc<Vec<Exclusion>>)> = self
            .direct()
            .iter()
            .map(|d| (d.module.clone(), d.revision.clone(), Arc::new(Vec::new())))
            .collect();

        while let Some((module, constraint, exclusions)) = queue.pop_front() {
            if exclusions.iter().any(|e| e.matches(&module)) {
                continue;
            }
            let constraint = match overrides.get(&module) {
                Some(pinned) => RevisionConstraint::exact(pinned.clone()),
                None => constraint,
            };

            let revision = match graph.revision_for(&module, &constraint) {
                Some(r) => r,
                None => {
                    match graph.requests.get(&(module.clone(), constraint.clone())) {
                        Some(RequestState::Failed(f)) => walk.fail(&module, f),
                        _ => {
                            walk.pending_requests.insert((module, constraint));
                        }
                    }
                    continue;
                }
            };

            walk.candidates
                .entry(module.clone())
                .or_default()
                .insert(revision.clone());

            let node = match graph.nodes.get(&(module.clone(), revision.clone())) {
                Some(NodeState::Loaded(node)) => Arc::clone(node),
                Some(NodeState::Failed(f)) => {
                    walk.fail(&module, f);
                    continue;
                }
                None => {
                    walk.pending_nodes.insert((module, revision));
                    continue;
                }
            };

            let selected = decisions
                .get(&module)
                .is_some_and(|d| d.selects(&revision));
            if !selected || !expanded.insert((module, revision)) {
                continue;
            }

            for edge in &node.edges {
                let exclusions = if edge.exclusions.is_empty() {
                    Arc::clone(&exclusions)
                } else {
                    Arc::new(exclusions.iter().chain(&edge.exclusions).cloned().collect())
                };
                queue.push_back((edge.module.clone(), edge.constraint.clone(), exclusions));
            }
        }

        walk
    }

    fn decide(&self, graph: &Graph, walk: &Walk) -> HashMap<ModuleId, Decision> {
        let mut decisions = HashMap::new();
        for (module, revisions) in &walk.candidates {
            let loaded: Vec<Candidate> = revisions
                .iter()
                .filter_map(|r| {
                    graph.loaded(module, r).map(|node| Candidate {
                        revision: r.clone(),
                        published: node.published,
                        priority: node.priority,
                    })
                })
                .collect();
            if loaded.is_empty() {
                continue;
            }

            let forced: Vec<Revision> = self
                .direct_for(module)
                .filter(|d| d.force)
                .filter_map(|d| graph.revision_for(module, &d.revision))
                .collect();
            let pool: Vec<Candidate> = if loaded.iter().any(|c| forced.contains(&c.revision)) {
                loaded
                    .into_iter()
                    .filter(|c| forced.contains(&c.revision))
                    .collect()
            } else {
                loaded
            };

            let direct: Vec<RevisionConstraint> =
                self.direct_for(module).map(|d| d.revision.clone()).collect();
            let decision = match self.settings.policy.select_winner(module, &pool, &direct) {
                Ok(selection) => Decision::Selected {
                    winners: selection.winners,
                    note: selection.note,
                },
                Err(conflict) => Decision::Conflict(conflict.candidates),
            };
            decisions.insert(module.clone(), decision);
        }
        decisions
    }

    async fn load_pending(&self, graph: &mut Graph, walk: Walk) -> Result<(), Cancelled> {
        let this = self;
        let requests: Vec<_> = stream::iter(walk.pending_requests)
            .map(move |(module, constraint)| async move {
                let state = this.resolve_request(&module, &constraint).await?;
                Ok::<_, Cancelled>(((module, constraint), state))
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;
        for result in requests {
            let (key, state) = result?;
            graph.requests.insert(key, state);
        }

        let nodes: Vec<_> = stream::iter(walk.pending_nodes)
            .map(move |(module, revision)| async move {
                let state = this.load_node(&module, &revision).await?;
                Ok::<_, Cancelled>(((module, revision), state))
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;
        for result in nodes {
            let (key, state) = result?;
            graph.nodes.insert(key, state);
        }
        Ok(())
    }

    /// Turn a dynamic constraint into a concrete revision using repository metadata.
    async fn resolve_request(
        &self,
        module: &ModuleId,
        constraint: &RevisionConstraint,
    ) -> Result<RequestState, Cancelled> {
        if let Some(exact) = constraint.exact_revision() {
            return Ok(RequestState::Resolved(exact.clone()));
        }
        let what = format!("{module}:{constraint}");
        tracing::debug!("Listing revisions for {what}");
        let outcome = query_chain(&self.settings.endpoints, |_, endpoint| {
            self.probe_metadata(endpoint, module, constraint)
        })
        .await?;

        Ok(match outcome {
            ChainOutcome::Found { value, .. } => {
                tracing::debug!("{what} resolved to {value}");
                RequestState::Resolved(value)
            }
            ChainOutcome::NotFound(attempts) => RequestState::Failed(Failure::from_attempts(
                &format!("revision matching {what}"),
                &attempts,
                false,
            )),
            ChainOutcome::Unreachable(attempts) => {
                RequestState::Failed(Failure::from_attempts(&what, &attempts, true))
            }
        })
    }

    async fn probe_metadata(
        &self,
        endpoint: &RepositoryEndpoint,
        module: &ModuleId,
        constraint: &RevisionConstraint,
    ) -> Result<Option<Revision>, FetchError> {
        let Some(url) = endpoint.metadata_url(module) else {
            return Ok(None);
        };
        let Some(resource) = self.guard.run(&url, self.transport.fetch(&url)).await? else {
            return Ok(None);
        };
        let metadata = match ModuleMetadata::parse(&resource.text()) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Ignoring malformed metadata at {url}: {e}");
                return Ok(None);
            }
        };
        Ok(constraint
            .select_latest(&metadata.revisions)
            .cloned()
            .or_else(|| {
                [metadata.release, metadata.latest]
                    .into_iter()
                    .flatten()
                    .find(|r| constraint.matches(r))
            }))
    }

    /// Find the descriptor of `module` at `revision`: memo, then disk cache,
    /// then the repository chain.
    async fn document(
        &self,
        module: &ModuleId,
        revision: &Revision,
    ) -> Result<Result<Arc<Document>, Failure>, Cancelled> {
        let key = (module.clone(), revision.clone());
        let memo = lock(&self.documents).get(&key).cloned();
        if let Some(doc) = memo {
            return Ok(Ok(doc));
        }

        if let Some(cached) = self.cache.read_descriptor(module, revision) {
            let priority = self
                .settings
                .endpoints
                .iter()
                .position(|e| e.name == cached.origin.repository);
            if let Some(priority) = priority {
                tracing::trace!("Descriptor cache hit for {module}:{revision}");
                let doc = Arc::new(Document {
                    text: Some(cached.text),
                    priority,
                    published: cached.origin.published,
                });
                lock(&self.documents).insert(key, Arc::clone(&doc));
                return Ok(Ok(doc));
            }
        }

        tracing::debug!("Fetching descriptor for {module}:{revision}");
        let outcome = query_chain(&self.settings.endpoints, |_, endpoint| {
            self.probe_descriptor(endpoint, module, revision)
        })
        .await?;

        let what = format!("{module}:{revision}");
        let doc = match outcome {
            ChainOutcome::Found {
                value: (text, published),
                priority,
                ..
            } => {
                if let (Some(text), Some(endpoint)) = (&text, self.settings.endpoints.get(priority)) {
                    let origin = Origin {
                        repository: endpoint.name.clone(),
                        published,
                    };
                    if let Err(e) = self.cache.store_descriptor(module, revision, text, &origin) {
                        tracing::warn!("Failed to cache descriptor for {what}: {e}");
                    }
                }
                Arc::new(Document {
                    text,
                    priority,
                    published,
                })
            }
            ChainOutcome::NotFound(attempts) => {
                return Ok(Err(Failure::from_attempts(&what, &attempts, false)));
            }
            ChainOutcome::Unreachable(attempts) => {
                return Ok(Err(Failure::from_attempts(&what, &attempts, true)));
            }
        };
        lock(&self.documents).insert(key, Arc::clone(&doc));
        Ok(Ok(doc))
    }

    async fn probe_descriptor(
        &self,
        endpoint: &RepositoryEndpoint,
        module: &ModuleId,
        revision: &Revision,
    ) -> Result<Option<(Option<String>, Option<DateTime<Utc>>)>, FetchError> {
        if endpoint.layout.descriptors {
            let url = endpoint.descriptor_url(module, revision);
            let found = self.guard.run(&url, self.transport.fetch(&url)).await?;
            Ok(found.map(|r| (Some(r.text()), r.last_modified)))
        } else {
            let key = ArtifactKey::primary(module.clone(), revision.clone(), DEFAULT_EXTENSION);
            let url = endpoint.artifact_url(&key);
            let found = self.guard.run(&url, self.transport.exists(&url)).await?;
            Ok(found.map(|info| (None, info.last_modified)))
        }
    }

    /// Effective POM of `module` at `revision`, with parents and imports applied.
    fn model(
        &self,
        module: ModuleId,
        revision: Revision,
        depth: usize,
    ) -> BoxFuture<'_, Result<Result<Arc<PomModel>, Failure>, Cancelled>> {
        async move {
            let what = format!("{module}:{revision}");
            if depth > MAX_PARENT_DEPTH {
                return Ok(Err(Failure::descriptor(&what, "descriptor nesting too deep")));
            }
            let key = (module.clone(), revision.clone());
            let memo = lock(&self.models).get(&key).cloned();
            if let Some(model) = memo {
                return Ok(Ok(model));
            }

            let doc = match self.document(&module, &revision).await? {
                Ok(doc) => doc,
                Err(failure) => return Ok(Err(failure)),
            };
            let Some(text) = &doc.text else {
                // Probed without a descriptor: a plain jar with no dependencies.
                return Ok(Ok(Arc::new(PomModel {
                    packaging: DEFAULT_EXTENSION.to_string(),
                    ..PomModel::default()
                })));
            };
            let own = match RawPom::parse(text) {
                Ok(pom) => pom,
                Err(e) => return Ok(Err(Failure::descriptor(&what, e))),
            };

            let mut chain = vec![own];
            let mut seen: HashSet<NodeKey> = HashSet::from([key.clone()]);
            loop {
                let parent = match chain.last().map(RawPom::parent_ref).transpose() {
                    Ok(parent) => parent.flatten(),
                    Err(e) => return Ok(Err(Failure::descriptor(&what, e))),
                };
                let Some((parent_module, parent_revision)) = parent else {
                    break;
                };
                let parent_what = format!("{parent_module}:{parent_revision}");
                if chain.len() > MAX_PARENT_DEPTH {
                    return Ok(Err(Failure::descriptor(
                        &what,
                        PomError::ParentTooDeep(parent_what),
                    )));
                }
                if !seen.insert((parent_module.clone(), parent_revision.clone())) {
                    return Ok(Err(Failure::descriptor(
                        &what,
                        PomError::ParentCycle(parent_what),
                    )));
                }
                let parent_doc = match self.document(&parent_module, &parent_revision).await? {
                    Ok(doc) => doc,
                    Err(failure) => {
                        return Ok(Err(Failure::descriptor(
                            &what,
                            format!("parent {}", failure.message),
                        )));
                    }
                };
                let Some(parent_text) = &parent_doc.text else {
                    return Ok(Err(Failure::descriptor(
                        &what,
                        format!("parent {parent_what} has no descriptor"),
                    )));
                };
                match RawPom::parse(parent_text) {
                    Ok(pom) => chain.push(pom),
                    Err(e) => {
                        return Ok(Err(Failure::descriptor(&what, format!("parent {parent_what}: {e}"))));
                    }
                }
            }

            let refs: Vec<&RawPom> = chain.iter().collect();
            let mut model = match PomModel::inherit(&refs) {
                Ok(model) => model,
                Err(e) => return Ok(Err(Failure::descriptor(&what, e))),
            };

            let mut boms = Vec::new();
            for (bom_module, bom_revision) in model.imports() {
                let bom_what = format!("{bom_module}:{bom_revision}");
                match self.model(bom_module, bom_revision, depth + 1).await? {
                    Ok(bom) => boms.push(bom),
                    Err(failure) => {
                        tracing::warn!("Skipping import {bom_what} in {what}: {}", failure.message);
                    }
                }
            }
            model.apply_imports(boms.iter().map(AsRef::as_ref));

            let model = Arc::new(model);
            lock(&self.models).insert(key, Arc::clone(&model));
            Ok(Ok(model))
        }
        .boxed()
    }

    async fn load_node(&self, module: &ModuleId, revision: &Revision) -> Result<NodeState, Cancelled> {
        self.reporter.resolving(module, revision);
        let what = format!("{module}:{revision}");

        let model = match self.model(module.clone(), revision.clone(), 0).await? {
            Ok(model) => model,
            Err(failure) => {
                tracing::debug!("{}", failure.message);
                return Ok(NodeState::Failed(failure));
            }
        };
        let doc = match self.document(module, revision).await? {
            Ok(doc) => doc,
            Err(failure) => return Ok(NodeState::Failed(failure)),
        };
        let Some(endpoint) = self.settings.endpoints.get(doc.priority) else {
            return Ok(NodeState::Failed(Failure::descriptor(&what, "unknown origin repository")));
        };

        let mut edges = Vec::new();
        for dep in model.resolved_dependencies() {
            if dep.optional || !accepts_scope(DEFAULT_CONFIGURATION, dep.scope.as_deref()) {
                continue;
            }
            let Some(version) = dep.version.as_deref() else {
                tracing::debug!("{what}: skipping {} without a version", dep.module);
                continue;
            };
            let constraint = match RevisionConstraint::parse(version) {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!("{what}: skipping {}: {e}", dep.module);
                    continue;
                }
            };
            if let Err(e) = dep.module.validate() {
                tracing::debug!("{what}: skipping dependency: {e}");
                continue;
            }
            edges.push(Edge {
                module: dep.module,
                constraint,
                exclusions: dep.exclusions,
            });
        }

        tracing::debug!("{what} from {} ({} dependencies)", endpoint.name, edges.len());
        Ok(NodeState::Loaded(Arc::new(Node {
            priority: doc.priority,
            origin: endpoint.name.clone(),
            published: doc.published,
            primary_extension: model.primary_extension().map(str::to_string),
            edges,
        })))
    }

    /// Files to materialize for a selected revision: the primary artifact,
    /// plus every classified artifact a direct declaration asked for.
    fn artifact_keys(&self, module: &ModuleId, revision: &Revision, node: &Node) -> Vec<ArtifactKey> {
        let declared_extension = self
            .direct_for(module)
            .filter(|d| d.classifier.is_none())
            .map(|d| d.extension.as_str())
            .find(|e| *e != DEFAULT_EXTENSION);
        let primary = declared_extension
            .map(str::to_string)
            .or_else(|| node.primary_extension.clone());

        let mut keys = Vec::new();
        if let Some(extension) = primary {
            keys.push(ArtifactKey::primary(module.clone(), revision.clone(), extension));
        }
        for dep in self.direct_for(module) {
            let Some(classifier) = &dep.classifier else {
                continue;
            };
            let key = ArtifactKey {
                module: module.clone(),
                revision: revision.clone(),
                classifier: Some(classifier.clone()),
                extension: dep.extension.clone(),
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    async fn materialize(
        &self,
        key: ArtifactKey,
        node: &Node,
    ) -> Result<Result<ArtifactDownloadResult, Diagnostic>, Cancelled> {
        if let Some(entry) = self.ledger.get(&key) {
            tracing::trace!("{key} already loaded from {}", entry.local_path.display());
            return Ok(Ok(ArtifactDownloadResult {
                status: DownloadStatus::Loaded,
                ..entry
            }));
        }

        let path = self.cache.artifact_path(&key);
        let result = |size, status, sha256| ArtifactDownloadResult {
            module: key.module.clone(),
            revision: key.revision.clone(),
            classifier: key.classifier.clone(),
            extension: key.extension.clone(),
            local_path: path.clone(),
            origin: node.origin.clone(),
            size,
            status,
            sha256,
        };

        if let Some(size) = self.cache.lookup(&key) {
            tracing::trace!("Cache hit for {key}");
            self.reporter
                .done(&key.module, &key.revision, "cached", Some(size));
            return Ok(Ok(result(size, DownloadStatus::Cached, None)));
        }

        let Some(endpoint) = self.settings.endpoints.get(node.priority) else {
            return Ok(Err(Diagnostic::error(
                DiagnosticKind::Download,
                Some(key.module.clone()),
                format!("{} has no origin repository", key.file_name()),
            )));
        };
        let url = endpoint.artifact_url(&key);
        self.reporter
            .downloading(&key.module, &key.revision, &key.file_name());

        let failure = match DownloadRequest::new(self.transport, &self.guard, &url, &path)
            .execute()
            .await
        {
            Ok(Some(stored)) => {
                tracing::debug!("Downloaded {key} from {} ({} bytes)", endpoint.name, stored.size);
                self.reporter
                    .done(&key.module, &key.revision, "downloaded", Some(stored.size));
                return Ok(Ok(result(
                    stored.size,
                    DownloadStatus::Downloaded,
                    Some(stored.sha256),
                )));
            }
            Ok(None) => format!("{} not found on {}", key.file_name(), endpoint.name),
            Err(DownloadError::Cancelled(c)) => return Err(c),
            Err(e) => format!("{} could not be downloaded: {e}", key.file_name()),
        };

        tracing::warn!("{}: {failure}", key.module);
        self.reporter.failed(&key.module, &failure);
        Ok(Err(Diagnostic::error(
            DiagnosticKind::Download,
            Some(key.module.clone()),
            failure,
        )
        .with_endpoints(vec![endpoint.name.clone()])))
    }
}
