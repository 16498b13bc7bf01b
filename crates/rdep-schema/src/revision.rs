//! Revision ordering and revision constraints.
//!
//! Supports:
//! - Exact: `1.7.1`
//! - Dynamic prefix: `1.7.+`, `+`
//! - Latest: `latest.release`, `latest.integration` (`RELEASE`, `LATEST`)
//! - Ranges: `[1.0,2.0)`, `(,1.5]`, `[1.2]`, `[1.0,1.2],[1.5,)`

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::module::CoordinateError;

/// A concrete module revision such as `2.15.3` or `1.0-SNAPSHOT`.
///
/// Equality and hashing use the literal string. Ordering is by version
/// (segment-wise, numeric where possible) with the literal string as a
/// tie-breaker, so `1.0` and `1.0.0` are distinct but adjacent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a new `Revision` without validation (for descriptor/deserialized data).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Create a validated `Revision`.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::InvalidRevision`] if `s` is empty or
    /// contains characters that never appear in a published revision.
    pub fn parse(s: &str) -> Result<Self, CoordinateError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoordinateError::EmptyField("version"));
        }
        if !s.chars().all(is_revision_char) {
            return Err(CoordinateError::InvalidRevision {
                value: s.to_string(),
                reason: "unexpected character",
            });
        }
        if !s.chars().any(|c| c.is_ascii_alphanumeric()) {
            return Err(CoordinateError::InvalidRevision {
                value: s.to_string(),
                reason: "no version digits or letters",
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Return the raw revision string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a Maven snapshot (integration) revision.
    pub fn is_snapshot(&self) -> bool {
        self.0.to_ascii_uppercase().ends_with("SNAPSHOT")
    }

    /// Compare two revisions by version semantics only.
    ///
    /// Numeric segments compare numerically, well-known qualifiers in
    /// release order (`dev < alpha < beta < milestone < rc < snapshot <
    /// release < sp`), other text case-insensitively and before numbers.
    /// Missing trailing segments count as a release, so `1.0 == 1.0.0`.
    pub fn version_cmp(&self, other: &Self) -> Ordering {
        let left = tokenize(&self.0);
        let right = tokenize(&other.0);

        for i in 0..left.len().max(right.len()) {
            let ord = compare_tokens(left.get(i), right.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Returns true if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.version_cmp(other) == Ordering::Greater
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version_cmp(other).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Revision {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Revision {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

fn is_revision_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '~')
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    /// Digits with leading zeros stripped.
    Number(&'a str),
    /// Lowercased text.
    Text(String),
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    fn push<'a>(out: &mut Vec<Token<'a>>, part: &'a str, digits: bool) {
        if part.is_empty() {
            return;
        }
        if digits {
            out.push(Token::Number(part.trim_start_matches('0')));
        } else {
            out.push(Token::Text(part.to_ascii_lowercase()));
        }
    }

    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut digits = false;

    for (i, c) in s.char_indices() {
        if matches!(c, '.' | '-' | '_' | '+' | '~') {
            if let Some(st) = start.take() {
                push(&mut out, &s[st..i], digits);
            }
            continue;
        }
        let is_digit = c.is_ascii_digit();
        match start {
            Some(st) if is_digit != digits => {
                push(&mut out, &s[st..i], digits);
                start = Some(i);
                digits = is_digit;
            }
            Some(_) => {}
            None => {
                start = Some(i);
                digits = is_digit;
            }
        }
    }
    if let Some(st) = start {
        push(&mut out, &s[st..], digits);
    }
    out
}

/// Rank given to qualifiers we do not know; sorts after `sp`.
const UNKNOWN_QUALIFIER: i8 = 2;

fn qualifier_rank(text: &str) -> i8 {
    match text {
        "dev" => -6,
        "alpha" | "a" => -5,
        "beta" | "b" => -4,
        "milestone" | "m" => -3,
        "rc" | "cr" => -2,
        "snapshot" => -1,
        "final" | "ga" | "release" => 0,
        "sp" => 1,
        _ => UNKNOWN_QUALIFIER,
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// How a present token compares against a missing one (an implicit release).
fn compare_with_missing(token: &Token<'_>) -> Ordering {
    match token {
        Token::Number(n) if n.is_empty() => Ordering::Equal,
        Token::Number(_) => Ordering::Greater,
        Token::Text(t) => qualifier_rank(t).cmp(&0),
    }
}

fn compare_tokens(a: Option<&Token<'_>>, b: Option<&Token<'_>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(x), None) => compare_with_missing(x),
        (None, Some(y)) => compare_with_missing(y).reverse(),
        (Some(Token::Number(x)), Some(Token::Number(y))) => compare_numbers(x, y),
        (Some(Token::Number(_)), Some(Token::Text(_))) => Ordering::Greater,
        (Some(Token::Text(_)), Some(Token::Number(_))) => Ordering::Less,
        (Some(Token::Text(x)), Some(Token::Text(y))) => {
            let (rx, ry) = (qualifier_rank(x), qualifier_rank(y));
            rx.cmp(&ry).then_with(|| {
                if rx == UNKNOWN_QUALIFIER {
                    x.cmp(y)
                } else {
                    Ordering::Equal
                }
            })
        }
    }
}

/// A revision requirement as written in a declaration or a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionConstraint {
    raw: String,
    kind: ConstraintKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstraintKind {
    Exact(Revision),
    Prefix(String),
    LatestRelease,
    LatestIntegration,
    Ranges(Vec<RevisionRange>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RevisionRange {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Bound {
    revision: Revision,
    inclusive: bool,
}

impl RevisionRange {
    fn contains(&self, revision: &Revision) -> bool {
        let above = self.lower.as_ref().is_none_or(|b| {
            let ord = revision.version_cmp(&b.revision);
            ord == Ordering::Greater || (b.inclusive && ord == Ordering::Equal)
        });
        let below = self.upper.as_ref().is_none_or(|b| {
            let ord = revision.version_cmp(&b.revision);
            ord == Ordering::Less || (b.inclusive && ord == Ordering::Equal)
        });
        above && below
    }
}

impl RevisionConstraint {
    /// Parse a revision constraint.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] if the constraint is empty, contains
    /// invalid characters or is a malformed range.
    pub fn parse(s: &str) -> Result<Self, CoordinateError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(CoordinateError::EmptyField("version"));
        }

        let kind = match raw {
            "latest.release" | "RELEASE" => ConstraintKind::LatestRelease,
            "latest.integration" | "LATEST" => ConstraintKind::LatestIntegration,
            _ if raw.starts_with('[') || raw.starts_with('(') => {
                ConstraintKind::Ranges(parse_ranges(raw)?)
            }
            _ if raw.ends_with('+') => {
                let prefix = &raw[..raw.len() - 1];
                if !prefix.chars().all(is_revision_char) {
                    return Err(invalid(raw, "unexpected character"));
                }
                ConstraintKind::Prefix(prefix.to_string())
            }
            _ => ConstraintKind::Exact(Revision::parse(raw)?),
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }

    /// A constraint matching exactly `revision`.
    pub fn exact(revision: Revision) -> Self {
        Self {
            raw: revision.as_str().to_string(),
            kind: ConstraintKind::Exact(revision),
        }
    }

    /// The constraint as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The pinned revision, if this constraint is exact.
    pub fn exact_revision(&self) -> Option<&Revision> {
        match &self.kind {
            ConstraintKind::Exact(r) => Some(r),
            _ => None,
        }
    }

    /// Whether resolving this constraint needs repository metadata.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self.kind, ConstraintKind::Exact(_))
    }

    /// Whether `revision` satisfies this constraint.
    pub fn matches(&self, revision: &Revision) -> bool {
        match &self.kind {
            ConstraintKind::Exact(r) => r.version_cmp(revision) == Ordering::Equal,
            ConstraintKind::Prefix(p) => revision.as_str().starts_with(p.as_str()),
            ConstraintKind::LatestRelease => !revision.is_snapshot(),
            ConstraintKind::LatestIntegration => true,
            ConstraintKind::Ranges(ranges) => ranges.iter().any(|r| r.contains(revision)),
        }
    }

    /// Pick the newest revision among `available` that satisfies this constraint.
    pub fn select_latest<'a>(
        &self,
        available: impl IntoIterator<Item = &'a Revision>,
    ) -> Option<&'a Revision> {
        available
            .into_iter()
            .filter(|r| self.matches(r))
            .max_by(|a, b| a.version_cmp(b))
    }
}

fn invalid(value: &str, reason: &'static str) -> CoordinateError {
    CoordinateError::InvalidRevision {
        value: value.to_string(),
        reason,
    }
}

fn parse_bound(text: &str, inclusive: bool) -> Result<Option<Bound>, CoordinateError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(Bound {
        revision: Revision::parse(text)?,
        inclusive,
    }))
}

fn parse_ranges(raw: &str) -> Result<Vec<RevisionRange>, CoordinateError> {
    let mut ranges = Vec::new();
    let mut rest = raw;

    while !rest.is_empty() {
        let lower_inclusive = match rest.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid(raw, "expected '[' or '('")),
        };
        let close = rest
            .find([']', ')'])
            .ok_or_else(|| invalid(raw, "unterminated range"))?;
        let upper_inclusive = rest[close..].starts_with(']');
        let body = &rest[1..close];

        let range = match body.split_once(',') {
            None => {
                if !(lower_inclusive && upper_inclusive) {
                    return Err(invalid(raw, "single-revision range must use brackets"));
                }
                let bound = parse_bound(body, true)?
                    .ok_or_else(|| invalid(raw, "empty range"))?;
                RevisionRange {
                    lower: Some(bound.clone()),
                    upper: Some(bound),
                }
            }
            Some((lo, hi)) => {
                if hi.contains(',') {
                    return Err(invalid(raw, "too many bounds in range"));
                }
                let lower = parse_bound(lo, lower_inclusive)?;
                let upper = parse_bound(hi, upper_inclusive)?;
                if lower.is_none() && upper.is_none() {
                    return Err(invalid(raw, "range has no bounds"));
                }
                if let (Some(l), Some(u)) = (&lower, &upper) {
                    if l.revision.version_cmp(&u.revision) == Ordering::Greater {
                        return Err(invalid(raw, "lower bound above upper bound"));
                    }
                }
                RevisionRange { lower, upper }
            }
        };
        ranges.push(range);

        rest = rest[close + 1..].trim_start();
        if let Some(next) = rest.strip_prefix(',') {
            rest = next.trim_start();
            if rest.is_empty() {
                return Err(invalid(raw, "trailing comma"));
            }
        } else if !rest.is_empty() {
            return Err(invalid(raw, "unexpected text after range"));
        }
    }

    Ok(ranges)
}

impl fmt::Display for RevisionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for RevisionConstraint {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RevisionConstraint {
    type Error = CoordinateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RevisionConstraint> for String {
    fn from(c: RevisionConstraint) -> Self {
        c.raw
    }
}

impl From<Revision> for RevisionConstraint {
    fn from(r: Revision) -> Self {
        Self::exact(r)
    }
}
