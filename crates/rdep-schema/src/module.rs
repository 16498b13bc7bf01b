//! Module identities and dependency coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DEFAULT_EXTENSION;
use crate::revision::{Revision, RevisionConstraint};

/// Errors raised for malformed coordinates.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    /// A required component (group, artifact, version, ...) is empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),

    /// The coordinate string does not have 3 to 5 `:`-separated components.
    #[error(
        "Invalid coordinates '{0}': expected group:artifact:version, \
         group:artifact:extension:version or group:artifact:extension:classifier:version"
    )]
    Malformed(String),

    /// A component contains characters that cannot appear in a coordinate.
    #[error("Invalid {field} '{value}'")]
    InvalidComponent {
        /// Which component was rejected.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The version or version constraint could not be parsed.
    #[error("Invalid revision '{value}': {reason}")]
    InvalidRevision {
        /// The rejected revision text.
        value: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

fn check_component(field: &'static str, value: &str) -> Result<(), CoordinateError> {
    if value.is_empty() {
        return Err(CoordinateError::EmptyField(field));
    }
    // Components become cache directory names, so `.` and `..` are out.
    if value.starts_with('.')
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '/' | '\\' | '$' | '{' | '}'))
    {
        return Err(CoordinateError::InvalidComponent {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// The `(group, artifact)` pair identifying a package regardless of version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    /// Group (organisation), e.g. `org.apache.commons`.
    pub group: String,
    /// Artifact (module name), e.g. `commons-lang3`.
    pub artifact: String,
}

impl ModuleId {
    /// Create a `ModuleId` without validation.
    pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
        }
    }

    /// Parse `group:artifact`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] if the string is not two non-empty,
    /// `:`-separated components.
    pub fn parse(s: &str) -> Result<Self, CoordinateError> {
        let (group, artifact) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| CoordinateError::Malformed(s.to_string()))?;
        let id = Self::new(group, artifact);
        id.validate()?;
        Ok(id)
    }

    /// Check both components are non-empty and free of separator characters.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] naming the offending component.
    pub fn validate(&self) -> Result<(), CoordinateError> {
        check_component("group", &self.group)?;
        check_component("artifact", &self.artifact)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.artifact)
    }
}

impl FromStr for ModuleId {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A dependency declaration: what the session asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Module identity.
    pub module: ModuleId,
    /// Requested revision or revision constraint.
    pub revision: RevisionConstraint,
    /// Optional classifier (e.g. `sources`, `linux-x86_64`).
    pub classifier: Option<String>,
    /// Artifact extension, `jar` unless stated otherwise.
    pub extension: String,
    /// Whether this revision must win conflicts for its module.
    pub force: bool,
}

impl Dependency {
    /// Create a declaration for `group:artifact:revision`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] if any component is empty or invalid.
    pub fn new(group: &str, artifact: &str, revision: &str) -> Result<Self, CoordinateError> {
        let module = ModuleId::new(group.trim(), artifact.trim());
        module.validate()?;
        Ok(Self {
            module,
            revision: RevisionConstraint::parse(revision)?,
            classifier: None,
            extension: DEFAULT_EXTENSION.to_string(),
            force: false,
        })
    }

    /// Parse Maven-style coordinates.
    ///
    /// Accepts `g:a:v`, `g:a:ext:v` and `g:a:ext:classifier:v`.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] for a wrong number of components, empty
    /// components or an unparseable version.
    pub fn parse(coords: &str) -> Result<Self, CoordinateError> {
        let parts: Vec<&str> = coords.trim().split(':').map(str::trim).collect();
        match parts.as_slice() {
            [g, a, v] => Self::new(g, a, v),
            [g, a, ext, v] => Self::new(g, a, v)?.with_extension(ext),
            [g, a, ext, classifier, v] => Self::new(g, a, v)?
                .with_extension(ext)?
                .with_classifier(classifier),
            _ => Err(CoordinateError::Malformed(coords.to_string())),
        }
    }

    /// Request a classified artifact in addition to the primary one.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] if the classifier is empty or invalid.
    pub fn with_classifier(mut self, classifier: &str) -> Result<Self, CoordinateError> {
        check_component("classifier", classifier)?;
        self.classifier = Some(classifier.to_string());
        Ok(self)
    }

    /// Override the artifact extension.
    ///
    /// # Errors
    ///
    /// Returns a [`CoordinateError`] if the extension is empty or invalid.
    pub fn with_extension(mut self, extension: &str) -> Result<Self, CoordinateError> {
        check_component("extension", extension)?;
        self.extension = extension.to_string();
        Ok(self)
    }

    /// Mark this declaration as forced.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Re-check every component (for declarations built field by field).
    ///
    /// # Errors
    ///
    /// Returns the first [`CoordinateError`] found.
    pub fn validate(&self) -> Result<(), CoordinateError> {
        self.module.validate()?;
        check_component("extension", &self.extension)?;
        if let Some(classifier) = &self.classifier {
            check_component("classifier", classifier)?;
        }
        RevisionConstraint::parse(self.revision.as_str()).map(|_| ())
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module)?;
        match &self.classifier {
            Some(c) => write!(f, ":{}:{c}", self.extension)?,
            None if self.extension != DEFAULT_EXTENSION => write!(f, ":{}", self.extension)?,
            None => {}
        }
        write!(f, ":{}", self.revision)
    }
}

impl FromStr for Dependency {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identity of one downloadable file: `(module, revision, classifier, extension)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Module identity.
    pub module: ModuleId,
    /// Concrete revision.
    pub revision: Revision,
    /// Classifier, if this is not the primary artifact.
    pub classifier: Option<String>,
    /// File extension.
    pub extension: String,
}

impl ArtifactKey {
    /// Key for the primary artifact of `module` at `revision`.
    pub fn primary(module: ModuleId, revision: Revision, extension: impl Into<String>) -> Self {
        Self {
            module,
            revision,
            classifier: None,
            extension: extension.into(),
        }
    }

    /// File name in Maven convention: `artifact-revision[-classifier].ext`.
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!(
                "{}-{}-{c}.{}",
                self.module.artifact, self.revision, self.extension
            ),
            None => format!(
                "{}-{}.{}",
                self.module.artifact, self.revision, self.extension
            ),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.revision)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{c}")?;
        }
        write!(f, "@{}", self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_three_components() {
        let dep = Dependency::parse("org.example:lib:1.0").unwrap();
        assert_eq!(dep.module, ModuleId::new("org.example", "lib"));
        assert_eq!(dep.revision.as_str(), "1.0");
        assert_eq!(dep.extension, "jar");
        assert_eq!(dep.classifier, None);
        assert!(!dep.force);
    }

    #[test]
    fn test_parse_extension_and_classifier() {
        let dep = Dependency::parse("io.netty:netty-transport-native-epoll:jar:linux-x86_64:4.1.100.Final")
            .unwrap();
        assert_eq!(dep.extension, "jar");
        assert_eq!(dep.classifier.as_deref(), Some("linux-x86_64"));
        assert_eq!(dep.revision.as_str(), "4.1.100.Final");

        let zip = Dependency::parse("g:a:zip:2.0").unwrap();
        assert_eq!(zip.extension, "zip");
        assert_eq!(zip.to_string(), "g:a:zip:2.0");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            Dependency::parse("g:a"),
            Err(CoordinateError::Malformed(_))
        ));
        assert!(matches!(
            Dependency::parse(":a:1.0"),
            Err(CoordinateError::EmptyField("group"))
        ));
        assert!(matches!(
            Dependency::parse("g::1.0"),
            Err(CoordinateError::EmptyField("artifact"))
        ));
        assert!(Dependency::parse("g:a:").is_err());
        assert!(Dependency::parse("g:a:[1.0,").is_err());
        assert!(Dependency::parse("g:a:b:c:d:e").is_err());
        assert!(Dependency::parse("g x:a:1.0").is_err());
    }

    #[test]
    fn test_parse_rejects_dot_components() {
        for coords in ["..:..:1.0", ".:a:1.0", "g:..:1.0", "g:.hidden:1.0", "g:a:jar:..:1.0"] {
            assert!(
                matches!(
                    Dependency::parse(coords),
                    Err(CoordinateError::InvalidComponent { .. })
                ),
                "{coords} accepted"
            );
        }
        assert!(ModuleId::parse("..:lib").is_err());
        assert!(Dependency::parse("g:a:..").is_err());
        assert!(Dependency::parse("org.example..x:a:1.0").is_ok());
    }

    #[test]
    fn test_display_roundtrip() {
        for coords in ["g:a:1.0", "g:a:jar:sources:1.0", "g:a:[1.0,2.0)"] {
            assert_eq!(Dependency::parse(coords).unwrap().to_string(), coords);
        }
    }

    #[test]
    fn test_module_id_parse() {
        let id: ModuleId = "org.slf4j:slf4j-api".parse().unwrap();
        assert_eq!(id.group, "org.slf4j");
        assert_eq!(id.to_string(), "org.slf4j:slf4j-api");
        assert!(ModuleId::parse("nocolon").is_err());
        assert!(ModuleId::parse("g:").is_err());
    }

    #[test]
    fn test_artifact_file_name() {
        let mut key = ArtifactKey::primary(ModuleId::new("g", "lib"), Revision::new("1.0"), "jar");
        assert_eq!(key.file_name(), "lib-1.0.jar");
        key.classifier = Some("sources".into());
        assert_eq!(key.file_name(), "lib-1.0-sources.jar");
        assert_eq!(key.to_string(), "g:lib:1.0:sources@jar");
    }
}
