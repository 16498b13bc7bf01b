//! Conflict policies: choosing among competing revisions of one module.
//!
//! Each policy is a pure function of the candidate set. Policies never see
//! the graph; the resolver hands them every revision of a module that was
//! requested and successfully loaded.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rdep_schema::{ModuleId, Revision, RevisionConstraint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session-wide conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep every candidate.
    None,
    /// Fail when more than one revision is requested.
    #[default]
    Strict,
    /// Highest revision wins.
    LatestRevision,
    /// Most recently published revision wins.
    LatestTime,
    /// Highest revision satisfying every direct constraint wins.
    LatestCompatible,
}

impl ConflictPolicy {
    /// All policies, in documentation order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Strict,
        Self::LatestRevision,
        Self::LatestTime,
        Self::LatestCompatible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Strict => "strict",
            Self::LatestRevision => "latest-revision",
            Self::LatestTime => "latest-time",
            Self::LatestCompatible => "latest-compatible",
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "none" | "all" => Ok(Self::None),
            "strict" => Ok(Self::Strict),
            "latest-revision" | "latest" => Ok(Self::LatestRevision),
            "latest-time" => Ok(Self::LatestTime),
            "latest-compatible" => Ok(Self::LatestCompatible),
            _ => Err(format!("Unknown conflict policy: {s}")),
        }
    }
}

/// One competing revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub revision: Revision,
    /// Publication time, if the serving endpoint reported one.
    pub published: Option<DateTime<Utc>>,
    /// Chain index of the endpoint that served this revision (0 = highest).
    pub priority: usize,
}

/// Outcome of a successful selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected revisions; exactly one unless the policy is [`ConflictPolicy::None`].
    pub winners: Vec<Revision>,
    /// Soft diagnostic to surface in the report.
    pub note: Option<String>,
}

impl Selection {
    fn single(revision: Revision) -> Self {
        Self {
            winners: vec![revision],
            note: None,
        }
    }
}

/// The policy refused to pick among competing revisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("conflicting revisions for {module}: {}", join(.candidates))]
pub struct ConflictError {
    pub module: ModuleId,
    pub candidates: Vec<Revision>,
}

fn join(revisions: &[Revision]) -> String {
    revisions
        .iter()
        .map(Revision::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn by_revision(a: &Candidate, b: &Candidate) -> Ordering {
    a.revision
        .version_cmp(&b.revision)
        // Lower chain index is the better endpoint.
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.revision.cmp(&b.revision))
}

fn by_time(a: &Candidate, b: &Candidate) -> Ordering {
    // `None < Some(_)`, so an unknown publish time sorts oldest.
    a.published
        .cmp(&b.published)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| a.revision.version_cmp(&b.revision))
}

/// Distinct revisions, keeping the best (lowest) priority for duplicates.
fn distinct(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        match out.iter_mut().find(|o| o.revision == c.revision) {
            Some(existing) if c.priority < existing.priority => *existing = c.clone(),
            Some(_) => {}
            None => out.push(c.clone()),
        }
    }
    out.sort_by(|a, b| a.revision.cmp(&b.revision));
    out
}

fn latest_by(
    candidates: &[Candidate],
    cmp: fn(&Candidate, &Candidate) -> Ordering,
) -> Option<Revision> {
    candidates
        .iter()
        .max_by(|a, b| cmp(a, b))
        .map(|c| c.revision.clone())
}

impl ConflictPolicy {
    /// Select the winning revision(s) of `module`.
    ///
    /// `direct` holds the constraints of the session's own declarations for
    /// this module; only [`ConflictPolicy::LatestCompatible`] looks at them.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError`] under [`ConflictPolicy::Strict`] when more
    /// than one distinct revision competes.
    pub fn select_winner(
        self,
        module: &ModuleId,
        candidates: &[Candidate],
        direct: &[RevisionConstraint],
    ) -> Result<Selection, ConflictError> {
        let candidates = distinct(candidates);
        if candidates.len() <= 1 {
            return Ok(Selection {
                winners: candidates.into_iter().map(|c| c.revision).collect(),
                note: None,
            });
        }

        let winner = match self {
            Self::None => {
                return Ok(Selection {
                    winners: candidates.into_iter().map(|c| c.revision).collect(),
                    note: None,
                });
            }
            Self::Strict => {
                return Err(ConflictError {
                    module: module.clone(),
                    candidates: candidates.into_iter().map(|c| c.revision).collect(),
                });
            }
            Self::LatestRevision => latest_by(&candidates, by_revision),
            Self::LatestTime => latest_by(&candidates, by_time),
            Self::LatestCompatible => {
                let compatible: Vec<Candidate> = candidates
                    .iter()
                    .filter(|c| direct.iter().all(|d| d.matches(&c.revision)))
                    .cloned()
                    .collect();
                if compatible.is_empty() {
                    let fallback = latest_by(&candidates, by_revision);
                    return Ok(Selection {
                        note: fallback.as_ref().map(|r| {
                            format!(
                                "no candidate among {} satisfies every direct constraint; using latest revision {r}",
                                join(&candidates.iter().map(|c| c.revision.clone()).collect::<Vec<_>>())
                            )
                        }),
                        winners: fallback.into_iter().collect(),
                    });
                }
                latest_by(&compatible, by_revision)
            }
        };

        Ok(winner.map_or_else(
            || Selection {
                winners: Vec::new(),
                note: None,
            },
            Selection::single,
        ))
    }
}
