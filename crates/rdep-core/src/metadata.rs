//! `maven-metadata.xml` revision listings, used to resolve dynamic constraints.

use chrono::{DateTime, NaiveDateTime, Utc};
use rdep_schema::Revision;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct RawVersions {
    #[serde(default)]
    version: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVersioning {
    latest: Option<String>,
    release: Option<String>,
    versions: Option<RawVersions>,
    last_updated: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    versioning: Option<RawVersioning>,
}

/// Revisions an endpoint publishes for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Published revisions, in listing order.
    pub revisions: Vec<Revision>,
    pub latest: Option<Revision>,
    pub release: Option<Revision>,
    pub last_updated: Option<DateTime<Utc>>,
}

fn revision(text: Option<&String>) -> Option<Revision> {
    text.and_then(|t| Revision::parse(t.trim()).ok())
}

impl ModuleMetadata {
    /// Parse a metadata document. Unparseable revisions are skipped.
    pub fn parse(text: &str) -> Result<Self, quick_xml::DeError> {
        let raw: RawMetadata = quick_xml::de::from_str(text)?;
        let Some(versioning) = raw.versioning else {
            return Ok(Self::default());
        };

        let revisions = versioning
            .versions
            .map(|v| v.version)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| Revision::parse(v.trim()).ok())
            .collect();

        let last_updated = versioning.last_updated.as_deref().and_then(|s| {
            NaiveDateTime::parse_from_str(s.trim(), "%Y%m%d%H%M%S")
                .ok()
                .map(|n| n.and_utc())
        });

        Ok(Self {
            revisions,
            latest: revision(versioning.latest.as_ref()),
            release: revision(versioning.release.as_ref()),
            last_updated,
        })
    }
}
