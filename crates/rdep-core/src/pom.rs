//! Maven POM descriptors.
//!
//! A POM is read in two steps. [`RawPom::parse`] deserializes one document
//! as written. [`PomModel::inherit`] then folds a parent chain into an
//! effective model with properties interpolated. Loading parents and
//! imported BOMs is the resolver's job; this module never does I/O.

use std::collections::HashMap;
use std::sync::LazyLock;

use rdep_schema::{DEFAULT_EXTENSION, ModuleId, Revision};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Deepest parent chain followed before giving up.
pub const MAX_PARENT_DEPTH: usize = 16;

const MAX_INTERPOLATION_PASSES: usize = 8;

static PROPERTY_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

#[derive(Error, Debug)]
pub enum PomError {
    #[error("Malformed POM: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("POM has no {0}")]
    Missing(&'static str),

    #[error("Invalid parent reference {0}")]
    InvalidParent(String),

    #[error("Parent chain deeper than {MAX_PARENT_DEPTH} at {0}")]
    ParentTooDeep(String),

    #[error("Parent cycle through {0}")]
    ParentCycle(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParent {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExclusion {
    group_id: Option<String>,
    artifact_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawExclusions {
    #[serde(default)]
    exclusion: Vec<RawExclusion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDependency {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    classifier: Option<String>,
    scope: Option<String>,
    optional: Option<String>,
    exclusions: Option<RawExclusions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDependencies {
    #[serde(default)]
    dependency: Vec<RawDependency>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawManagement {
    dependencies: Option<RawDependencies>,
}

/// One POM document as written, before inheritance and interpolation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPom {
    group_id: Option<String>,
    artifact_id: Option<String>,
    version: Option<String>,
    packaging: Option<String>,
    parent: Option<RawParent>,
    #[serde(default)]
    properties: HashMap<String, String>,
    dependency_management: Option<RawManagement>,
    dependencies: Option<RawDependencies>,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl RawPom {
    /// Deserialize a POM document.
    ///
    /// # Errors
    ///
    /// Returns [`PomError::Xml`] for malformed XML.
    pub fn parse(text: &str) -> Result<Self, PomError> {
        Ok(quick_xml::de::from_str(text)?)
    }

    /// The parent's coordinates, if the POM declares one.
    ///
    /// # Errors
    ///
    /// Returns [`PomError::InvalidParent`] if the parent reference is
    /// incomplete or uses properties.
    pub fn parent_ref(&self) -> Result<Option<(ModuleId, Revision)>, PomError> {
        let Some(parent) = &self.parent else {
            return Ok(None);
        };
        let group = non_empty(parent.group_id.as_ref());
        let artifact = non_empty(parent.artifact_id.as_ref());
        let version = non_empty(parent.version.as_ref());
        let (Some(group), Some(artifact), Some(version)) = (group, artifact, version) else {
            return Err(PomError::InvalidParent("with missing coordinates".into()));
        };
        let module = ModuleId::new(group, artifact);
        let label = format!("{module}:{version}");
        if module.validate().is_err() {
            return Err(PomError::InvalidParent(label));
        }
        let revision = Revision::parse(&version).map_err(|_| PomError::InvalidParent(label))?;
        Ok(Some((module, revision)))
    }

    fn raw_dependencies(&self) -> &[RawDependency] {
        self.dependencies
            .as_ref()
            .map_or(&[], |d| d.dependency.as_slice())
    }

    fn raw_managed(&self) -> &[RawDependency] {
        self.dependency_management
            .as_ref()
            .and_then(|m| m.dependencies.as_ref())
            .map_or(&[], |d| d.dependency.as_slice())
    }
}

/// A `groupId:artifactId` exclusion pattern; `*` matches anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Exclusion {
    pub group: String,
    pub artifact: String,
}

impl Exclusion {
    pub fn matches(&self, module: &ModuleId) -> bool {
        (self.group == "*" || self.group == module.group)
            && (self.artifact == "*" || self.artifact == module.artifact)
    }
}

/// A dependency edge of an effective POM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomDependency {
    pub module: ModuleId,
    pub version: Option<String>,
    /// Maven `type`; `jar` when absent.
    pub kind: String,
    pub classifier: Option<String>,
    pub scope: Option<String>,
    pub optional: bool,
    pub exclusions: Vec<Exclusion>,
}

impl PomDependency {
    /// Extension of the artifact this edge points at.
    pub fn extension(&self) -> &str {
        match self.kind.as_str() {
            "test-jar" | "ejb-client" | "bundle" | "maven-plugin" | "eclipse-plugin" => {
                DEFAULT_EXTENSION
            }
            other => other,
        }
    }

    /// Classifier implied by the type, or the declared one.
    pub fn effective_classifier(&self) -> Option<&str> {
        match (self.classifier.as_deref(), self.kind.as_str()) {
            (Some(c), _) => Some(c),
            (None, "test-jar") => Some("tests"),
            (None, "ejb-client") => Some("client"),
            _ => None,
        }
    }

    fn management_key(&self) -> (ModuleId, String, Option<String>) {
        (self.module.clone(), self.kind.clone(), self.classifier.clone())
    }

    fn is_import(&self) -> bool {
        self.scope.as_deref() == Some("import") && self.kind == "pom"
    }
}

/// Extension of the primary artifact for a packaging, or `None` when the
/// module has no primary artifact.
pub fn packaging_extension(packaging: &str) -> Option<&str> {
    match packaging {
        "pom" => None,
        "" | "jar" | "bundle" | "maven-plugin" | "eclipse-plugin" => Some(DEFAULT_EXTENSION),
        other if other.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_')) => {
            Some(other)
        }
        _ => Some(DEFAULT_EXTENSION),
    }
}

/// An effective POM: inheritance applied and properties interpolated.
#[derive(Debug, Clone, Default)]
pub struct PomModel {
    pub group: Option<String>,
    pub artifact: Option<String>,
    pub version: Option<String>,
    pub packaging: String,
    pub properties: HashMap<String, String>,
    pub managed: Vec<PomDependency>,
    pub dependencies: Vec<PomDependency>,
}

struct Context<'a> {
    group: Option<&'a str>,
    artifact: Option<&'a str>,
    version: Option<&'a str>,
    packaging: &'a str,
    parent: Option<&'a RawParent>,
    properties: &'a HashMap<String, String>,
}

impl Context<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        let builtin = key
            .strip_prefix("project.")
            .or_else(|| key.strip_prefix("pom."));
        match builtin {
            Some("groupId") => return self.group.map(str::to_string),
            Some("artifactId") => return self.artifact.map(str::to_string),
            Some("version") => return self.version.map(str::to_string),
            Some("packaging") => return Some(self.packaging.to_string()),
            Some("parent.groupId") => return self.parent.and_then(|p| p.group_id.clone()),
            Some("parent.version") => return self.parent.and_then(|p| p.version.clone()),
            Some("parent.artifactId") => return self.parent.and_then(|p| p.artifact_id.clone()),
            _ => {}
        }
        match key {
            "groupId" => self.group.map(str::to_string),
            "version" => self.version.map(str::to_string),
            "parent.version" => self.parent.and_then(|p| p.version.clone()),
            _ => self.properties.get(key).cloned(),
        }
    }

    fn interpolate(&self, value: &str) -> String {
        let mut current = value.trim().to_string();
        for _ in 0..MAX_INTERPOLATION_PASSES {
            if !current.contains("${") {
                break;
            }
            let next = PROPERTY_REF
                .replace_all(&current, |caps: &regex::Captures<'_>| {
                    self.lookup(&caps[1])
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn opt(&self, value: Option<&String>) -> Option<String> {
        non_empty(value).map(|v| self.interpolate(&v))
    }

    fn dependency(&self, raw: &RawDependency) -> Option<PomDependency> {
        let group = self.opt(raw.group_id.as_ref())?;
        let artifact = self.opt(raw.artifact_id.as_ref())?;
        let exclusions = raw
            .exclusions
            .as_ref()
            .map(|e| {
                e.exclusion
                    .iter()
                    .filter_map(|x| {
                        Some(Exclusion {
                            group: self.opt(x.group_id.as_ref())?,
                            artifact: self
                                .opt(x.artifact_id.as_ref())
                                .unwrap_or_else(|| "*".to_string()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(PomDependency {
            module: ModuleId::new(group, artifact),
            version: self.opt(raw.version.as_ref()),
            kind: self
                .opt(raw.kind.as_ref())
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            classifier: self.opt(raw.classifier.as_ref()),
            scope: self.opt(raw.scope.as_ref()),
            optional: self
                .opt(raw.optional.as_ref())
                .is_some_and(|o| o.eq_ignore_ascii_case("true")),
            exclusions,
        })
    }
}

impl PomModel {
    /// Fold `chain` (the module's own POM first, then its ancestors) into an
    /// effective model.
    ///
    /// # Errors
    ///
    /// Returns [`PomError::Missing`] for an empty chain, or
    /// [`PomError::ParentTooDeep`] for a chain over [`MAX_PARENT_DEPTH`].
    pub fn inherit(chain: &[&RawPom]) -> Result<Self, PomError> {
        let Some(own) = chain.first() else {
            return Err(PomError::Missing("project"));
        };
        if chain.len() > MAX_PARENT_DEPTH + 1 {
            return Err(PomError::ParentTooDeep(
                non_empty(own.artifact_id.as_ref()).unwrap_or_default(),
            ));
        }

        // Nearest declaration wins: walk from the root ancestor down.
        let mut properties = HashMap::new();
        for pom in chain.iter().rev() {
            properties.extend(pom.properties.iter().map(|(k, v)| (k.clone(), v.trim().to_string())));
        }

        let parent = own.parent.as_ref();
        let group = non_empty(own.group_id.as_ref())
            .or_else(|| parent.and_then(|p| non_empty(p.group_id.as_ref())));
        let version = non_empty(own.version.as_ref())
            .or_else(|| parent.and_then(|p| non_empty(p.version.as_ref())));
        let artifact = non_empty(own.artifact_id.as_ref());
        let packaging =
            non_empty(own.packaging.as_ref()).unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

        let ctx = Context {
            group: group.as_deref(),
            artifact: artifact.as_deref(),
            version: version.as_deref(),
            packaging: &packaging,
            parent,
            properties: &properties,
        };

        let mut managed: Vec<PomDependency> = Vec::new();
        let mut dependencies: Vec<PomDependency> = Vec::new();
        for pom in chain {
            for dep in pom.raw_managed().iter().filter_map(|d| ctx.dependency(d)) {
                if !managed.iter().any(|m| m.management_key() == dep.management_key()) {
                    managed.push(dep);
                }
            }
            for dep in pom.raw_dependencies().iter().filter_map(|d| ctx.dependency(d)) {
                if !dependencies.iter().any(|m| m.management_key() == dep.management_key()) {
                    dependencies.push(dep);
                }
            }
        }

        let properties = properties
            .iter()
            .map(|(k, v)| (k.clone(), ctx.interpolate(v)))
            .collect();
        let group = ctx.group.map(|g| ctx.interpolate(g));
        let version = ctx.version.map(|v| ctx.interpolate(v));
        let packaging = ctx.interpolate(ctx.packaging);

        Ok(Self {
            group,
            version,
            artifact: artifact.clone(),
            packaging,
            properties,
            managed,
            dependencies,
        })
    }

    /// BOMs imported through `dependencyManagement` (`scope=import`, `type=pom`).
    pub fn imports(&self) -> Vec<(ModuleId, Revision)> {
        self.managed
            .iter()
            .filter(|d| d.is_import())
            .filter_map(|d| {
                let revision = Revision::parse(d.version.as_deref()?).ok()?;
                Some((d.module.clone(), revision))
            })
            .collect()
    }

    /// Merge the managed entries of imported BOMs; local entries win.
    pub fn apply_imports<'a>(&mut self, boms: impl IntoIterator<Item = &'a PomModel>) {
        self.managed.retain(|d| !d.is_import());
        for bom in boms {
            for dep in &bom.managed {
                if !dep.is_import()
                    && !self
                        .managed
                        .iter()
                        .any(|m| m.management_key() == dep.management_key())
                {
                    self.managed.push(dep.clone());
                }
            }
        }
    }

    /// Extension of the primary artifact, `None` for `pom` packaging.
    pub fn primary_extension(&self) -> Option<&str> {
        packaging_extension(&self.packaging)
    }

    /// Dependencies with versions, scopes and exclusions filled in from
    /// `dependencyManagement`.
    pub fn resolved_dependencies(&self) -> Vec<PomDependency> {
        self.dependencies
            .iter()
            .map(|dep| {
                let mut dep = dep.clone();
                let managed = self
                    .managed
                    .iter()
                    .find(|m| m.management_key() == dep.management_key());
                if let Some(managed) = managed {
                    if dep.version.is_none() {
                        dep.version.clone_from(&managed.version);
                    }
                    if dep.scope.is_none() {
                        dep.scope.clone_from(&managed.scope);
                    }
                    for ex in &managed.exclusions {
                        if !dep.exclusions.contains(ex) {
                            dep.exclusions.push(ex.clone());
                        }
                    }
                }
                dep
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
  <modelVersion>4.0.0</modelVersion>
  <groupId>org.example</groupId>
  <artifactId>parent</artifactId>
  <version>2.1</version>
  <packaging>pom</packaging>
  <properties>
    <slf4j.version>2.0.9</slf4j.version>
    <junit.version>4.13.2</junit.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.slf4j</groupId>
        <artifactId>slf4j-api</artifactId>
        <version>${slf4j.version}</version>
      </dependency>
      <dependency>
        <groupId>junit</groupId>
        <artifactId>junit</artifactId>
        <version>${junit.version}</version>
        <scope>test</scope>
      </dependency>
    </dependencies>
  </dependencyManagement>
</project>"#;

    const CHILD: &str = r#"<project>
  <parent>
    <groupId>org.example</groupId>
    <artifactId>parent</artifactId>
    <version>2.1</version>
  </parent>
  <artifactId>lib</artifactId>
  <properties>
    <slf4j.version>2.0.12</slf4j.version>
  </properties>
  <dependencies>
    <dependency>
      <groupId>org.slf4j</groupId>
      <artifactId>slf4j-api</artifactId>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
    </dependency>
    <dependency>
      <groupId>${project.groupId}</groupId>
      <artifactId>lib-core</artifactId>
      <version>${project.version}</version>
      <exclusions>
        <exclusion>
          <groupId>commons-logging</groupId>
          <artifactId>*</artifactId>
        </exclusion>
      </exclusions>
    </dependency>
    <dependency>
      <groupId>org.example</groupId>
      <artifactId>fixtures</artifactId>
      <version>1.0</version>
      <type>test-jar</type>
      <optional>true</optional>
    </dependency>
  </dependencies>
</project>"#;

    #[test]
    fn test_parent_reference() {
        let child = RawPom::parse(CHILD).unwrap();
        let (module, rev) = child.parent_ref().unwrap().unwrap();
        assert_eq!(module, ModuleId::new("org.example", "parent"));
        assert_eq!(rev, Revision::new("2.1"));
        assert!(RawPom::parse(PARENT).unwrap().parent_ref().unwrap().is_none());
    }

    #[test]
    fn test_inheritance_and_management() {
        let parent = RawPom::parse(PARENT).unwrap();
        let child = RawPom::parse(CHILD).unwrap();
        let model = PomModel::inherit(&[&child, &parent]).unwrap();

        assert_eq!(model.group.as_deref(), Some("org.example"));
        assert_eq!(model.version.as_deref(), Some("2.1"));
        assert_eq!(model.primary_extension(), Some("jar"));

        let deps = model.resolved_dependencies();
        assert_eq!(deps.len(), 4);

        // Child property overrides the parent's.
        assert_eq!(deps[0].version.as_deref(), Some("2.0.12"));
        assert_eq!(deps[1].scope.as_deref(), Some("test"));

        assert_eq!(deps[2].module, ModuleId::new("org.example", "lib-core"));
        assert_eq!(deps[2].version.as_deref(), Some("2.1"));
        assert!(deps[2].exclusions[0].matches(&ModuleId::new("commons-logging", "commons-logging")));

        assert!(deps[3].optional);
        assert_eq!(deps[3].effective_classifier(), Some("tests"));
        assert_eq!(deps[3].extension(), "jar");
    }

    #[test]
    fn test_bom_import() {
        let bom = RawPom::parse(
            r"<project><groupId>org.bom</groupId><artifactId>bom</artifactId><version>1.0</version>
              <packaging>pom</packaging>
              <dependencyManagement><dependencies>
                <dependency><groupId>g</groupId><artifactId>a</artifactId><version>3.3</version></dependency>
              </dependencies></dependencyManagement></project>",
        )
        .unwrap();
        let app = RawPom::parse(
            r"<project><groupId>org.app</groupId><artifactId>app</artifactId><version>1.0</version>
              <dependencyManagement><dependencies>
                <dependency><groupId>org.bom</groupId><artifactId>bom</artifactId><version>1.0</version>
                  <type>pom</type><scope>import</scope></dependency>
              </dependencies></dependencyManagement>
              <dependencies><dependency><groupId>g</groupId><artifactId>a</artifactId></dependency></dependencies>
              </project>",
        )
        .unwrap();

        let bom = PomModel::inherit(&[&bom]).unwrap();
        assert_eq!(bom.primary_extension(), None);

        let mut model = PomModel::inherit(&[&app]).unwrap();
        assert_eq!(
            model.imports(),
            vec![(ModuleId::new("org.bom", "bom"), Revision::new("1.0"))]
        );
        model.apply_imports([&bom]);
        assert!(model.imports().is_empty());
        assert_eq!(model.resolved_dependencies()[0].version.as_deref(), Some("3.3"));
    }

    #[test]
    fn test_project_coordinates_interpolated() {
        let pom = RawPom::parse(
            r"<project><groupId>org.${vendor}</groupId><artifactId>app</artifactId>
              <version>${revision}</version><packaging>${kind}</packaging>
              <properties><vendor>acme</vendor><revision>4.2</revision><kind>bundle</kind></properties>
              </project>",
        )
        .unwrap();
        let model = PomModel::inherit(&[&pom]).unwrap();
        assert_eq!(model.group.as_deref(), Some("org.acme"));
        assert_eq!(model.version.as_deref(), Some("4.2"));
        assert_eq!(model.artifact.as_deref(), Some("app"));
        assert_eq!(model.primary_extension(), Some("jar"));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            RawPom::parse("<project><dependencies>"),
            Err(PomError::Xml(_))
        ));
    }

    #[test]
    fn test_packaging_extension() {
        assert_eq!(packaging_extension("bundle"), Some("jar"));
        assert_eq!(packaging_extension("pom"), None);
        assert_eq!(packaging_extension("aar"), Some("aar"));
        assert_eq!(packaging_extension("../../escape"), Some("jar"));
        assert_eq!(packaging_extension("${unset}"), Some("jar"));
    }

    #[test]
    fn test_exclusion_wildcards() {
        let all = Exclusion {
            group: "*".into(),
            artifact: "*".into(),
        };
        assert!(all.matches(&ModuleId::new("x", "y")));
        let one = Exclusion {
            group: "x".into(),
            artifact: "y".into(),
        };
        assert!(!one.matches(&ModuleId::new("x", "z")));
    }
}
