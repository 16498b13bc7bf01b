//! Repository chain: an ordered, uniquely-named, append-only list of endpoints.
//!
//! Insertion order is query priority. Endpoints are never removed within a
//! session, so a resolution that relied on an endpoint stays reproducible.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rdep_schema::{RepositoryEndpoint, RepositoryLayout};
use thiserror::Error;

use crate::io::transport::{Cancelled, FetchError};

/// Default public repositories, in priority order.
pub const DEFAULT_REPOSITORIES: [(&str, &str); 4] = [
    ("central", "https://repo.maven.apache.org/maven2/"),
    ("jcenter", "https://jcenter.bintray.com/"),
    (
        "jboss",
        "https://repository.jboss.org/nexus/content/repositories/releases/",
    ),
    ("atlassian", "https://packages.atlassian.com/maven/public"),
];

/// Rejected attempt to register a repository name twice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot add repository with name {0} since it already exists")]
pub struct DuplicateRepositoryError(pub String);

/// Ordered collection of repository endpoints.
#[derive(Debug, Default)]
pub struct RepositoryChain {
    endpoints: Mutex<Vec<RepositoryEndpoint>>,
}

impl RepositoryChain {
    /// An empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain holding [`DEFAULT_REPOSITORIES`].
    pub fn with_defaults() -> Self {
        let chain = Self::new();
        for endpoint in default_endpoints() {
            chain.lock().push(endpoint);
        }
        chain
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RepositoryEndpoint>> {
        // Append-only: a poisoned guard still holds a consistent list.
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an endpoint at the lowest priority.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRepositoryError`] if the name is taken; the chain is
    /// left untouched.
    pub fn add_endpoint(&self, endpoint: RepositoryEndpoint) -> Result<(), DuplicateRepositoryError> {
        let mut endpoints = self.lock();
        if endpoints.iter().any(|e| e.name == endpoint.name) {
            return Err(DuplicateRepositoryError(endpoint.name));
        }
        tracing::debug!("Added repository {endpoint}");
        endpoints.push(endpoint);
        Ok(())
    }

    /// Append an endpoint built from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRepositoryError`] if the name is taken.
    pub fn add(
        &self,
        name: &str,
        url: &str,
        layout: RepositoryLayout,
    ) -> Result<(), DuplicateRepositoryError> {
        self.add_endpoint(RepositoryEndpoint::new(name, url, layout))
    }

    /// Snapshot of the chain in priority order.
    pub fn list_endpoints(&self) -> Vec<RepositoryEndpoint> {
        self.lock().clone()
    }

    /// Priority (0 = highest) of the named endpoint.
    pub fn priority_of(&self, name: &str) -> Option<usize> {
        self.lock().iter().position(|e| e.name == name)
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// The built-in endpoints as values.
pub fn default_endpoints() -> Vec<RepositoryEndpoint> {
    DEFAULT_REPOSITORIES
        .iter()
        .map(|(name, url)| RepositoryEndpoint::maven(*name, url))
        .collect()
}

/// What happened when one endpoint was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The endpoint answered that it does not have the resource.
    NotFound,
    /// The endpoint could not be reached or answered with an error.
    Failed(String),
}

/// One endpoint query in a chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// Endpoint name.
    pub endpoint: String,
    /// Outcome.
    pub outcome: AttemptOutcome,
}

/// Result of walking the chain for one resource.
#[derive(Debug)]
pub enum ChainOutcome<T> {
    /// Found on the endpoint at `priority`.
    Found {
        /// The resource.
        value: T,
        /// Index of the serving endpoint.
        priority: usize,
        /// Endpoints tried before it.
        attempts: Vec<Attempt>,
    },
    /// No endpoint had the resource and at least one answered "not found".
    /// Some of the attempts may still have failed.
    NotFound(Vec<Attempt>),
    /// Every endpoint failed.
    Unreachable(Vec<Attempt>),
}

impl<T> ChainOutcome<T> {
    /// Endpoint names that were tried without success.
    pub fn attempted_endpoints(&self) -> Vec<String> {
        let attempts = match self {
            Self::Found { attempts, .. } | Self::NotFound(attempts) | Self::Unreachable(attempts) => {
                attempts
            }
        };
        attempts.iter().map(|a| a.endpoint.clone()).collect()
    }
}

/// Query `endpoints` in priority order until `probe` finds the resource.
///
/// "Not found" moves on to the next endpoint; so does a transport failure,
/// after it is logged. Only cancellation stops the walk early. The walk is
/// [`ChainOutcome::Unreachable`] only when no endpoint answered at all.
///
/// # Errors
///
/// Returns [`Cancelled`] if a probe was cancelled.
pub async fn query_chain<'a, T, F, Fut>(
    endpoints: &'a [RepositoryEndpoint],
    mut probe: F,
) -> Result<ChainOutcome<T>, Cancelled>
where
    F: FnMut(usize, &'a RepositoryEndpoint) -> Fut,
    Fut: Future<Output = Result<Option<T>, FetchError>>,
{
    let mut attempts = Vec::new();

    for (priority, endpoint) in endpoints.iter().enumerate() {
        match probe(priority, endpoint).await {
            Ok(Some(value)) => {
                return Ok(ChainOutcome::Found {
                    value,
                    priority,
                    attempts,
                });
            }
            Ok(None) => attempts.push(Attempt {
                endpoint: endpoint.name.clone(),
                outcome: AttemptOutcome::NotFound,
            }),
            Err(FetchError::Transport(e)) => {
                tracing::warn!("Repository {} failed, trying next: {e}", endpoint.name);
                attempts.push(Attempt {
                    endpoint: endpoint.name.clone(),
                    outcome: AttemptOutcome::Failed(e.to_string()),
                });
            }
            Err(FetchError::Cancelled(c)) => return Err(c),
        }
    }

    let answered = attempts
        .iter()
        .any(|a| matches!(a.outcome, AttemptOutcome::NotFound));
    if !attempts.is_empty() && !answered {
        Ok(ChainOutcome::Unreachable(attempts))
    } else {
        Ok(ChainOutcome::NotFound(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::TransportError;

    #[test]
    fn test_duplicate_name_rejected_without_mutation() {
        let chain = RepositoryChain::new();
        chain
            .add("central", "https://a.example.org/", RepositoryLayout::MAVEN)
            .unwrap();
        let before = chain.list_endpoints();

        let err = chain
            .add("central", "https://b.example.org/", RepositoryLayout::MAVEN)
            .unwrap_err();
        assert_eq!(err, DuplicateRepositoryError("central".into()));
        assert_eq!(chain.list_endpoints(), before);
    }

    #[test]
    fn test_priority_is_insertion_order() {
        let chain = RepositoryChain::with_defaults();
        chain
            .add("backup", "https://backup.example.org/", RepositoryLayout::MAVEN)
            .unwrap();
        let names: Vec<String> = chain.list_endpoints().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["central", "jcenter", "jboss", "atlassian", "backup"]);
        assert_eq!(chain.priority_of("backup"), Some(4));
        assert_eq!(chain.priority_of("missing"), None);
    }

    fn endpoints() -> Vec<RepositoryEndpoint> {
        vec![
            RepositoryEndpoint::maven("first", "https://first.example.org/"),
            RepositoryEndpoint::maven("second", "https://second.example.org/"),
            RepositoryEndpoint::maven("third", "https://third.example.org/"),
        ]
    }

    #[tokio::test]
    async fn test_query_falls_through_not_found_and_failures() {
        let endpoints = endpoints();
        let outcome = query_chain(&endpoints, |priority, _| async move {
            match priority {
                0 => Ok(None),
                1 => Err(FetchError::Transport(TransportError::Network {
                    url: "https://second.example.org/".into(),
                    message: "connection refused".into(),
                })),
                _ => Ok(Some("hit")),
            }
        })
        .await
        .unwrap();

        match outcome {
            ChainOutcome::Found {
                value,
                priority,
                attempts,
            } => {
                assert_eq!(value, "hit");
                assert_eq!(priority, 2);
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].outcome, AttemptOutcome::NotFound);
                assert!(matches!(attempts[1].outcome, AttemptOutcome::Failed(_)));
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_distinguishes_not_found_from_unreachable() {
        let endpoints = endpoints();
        let outcome = query_chain::<(), _, _>(&endpoints, |_, _| async { Ok(None) })
            .await
            .unwrap();
        assert!(matches!(outcome, ChainOutcome::NotFound(ref a) if a.len() == 3));

        let outcome = query_chain::<(), _, _>(&endpoints, |_, e| {
            let url = e.base_url.clone();
            async move { Err(FetchError::Transport(TransportError::Timeout { url })) }
        })
        .await
        .unwrap();
        assert!(matches!(outcome, ChainOutcome::Unreachable(_)));
        assert_eq!(
            outcome.attempted_endpoints(),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn test_query_with_one_answer_is_not_unreachable() {
        let endpoints = endpoints();
        let outcome = query_chain::<(), _, _>(&endpoints, |priority, e| {
            let url = e.base_url.clone();
            async move {
                if priority == 1 {
                    Ok(None)
                } else {
                    Err(FetchError::Transport(TransportError::Timeout { url }))
                }
            }
        })
        .await
        .unwrap();
        match outcome {
            ChainOutcome::NotFound(attempts) => {
                assert_eq!(attempts.len(), 3);
                assert!(matches!(attempts[0].outcome, AttemptOutcome::Failed(_)));
                assert_eq!(attempts[1].outcome, AttemptOutcome::NotFound);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_stops_on_cancel() {
        let endpoints = endpoints();
        let mut calls = 0;
        let result = query_chain::<(), _, _>(&endpoints, |_, _| {
            calls += 1;
            async { Err(FetchError::Cancelled(Cancelled)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
