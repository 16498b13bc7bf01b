//! The virtual module descriptor: a synthetic root module standing for the
//! running session.
//!
//! Direct dependencies attach to its `default` configuration. Overrides pin a
//! module identity to one revision for every edge in the graph.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rdep_schema::{Dependency, ModuleId, Revision};
use serde::Serialize;

/// Group of the session's root module.
pub const ROOT_GROUP: &str = "notebook";
/// Artifact name of the session's root module.
pub const ROOT_ARTIFACT: &str = "session-kernel";
/// Status of the session's root module.
pub const ROOT_STATUS: &str = "integration";
/// Configuration direct dependencies bind to.
pub const DEFAULT_CONFIGURATION: &str = "default";

/// A named configuration and the configurations it extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub name: &'static str,
    pub extends: &'static [&'static str],
}

/// The fixed configuration graph of the root module.
pub const CONFIGURATIONS: [Configuration; 6] = [
    Configuration {
        name: "master",
        extends: &[],
    },
    Configuration {
        name: "compile",
        extends: &["master"],
    },
    Configuration {
        name: "runtime",
        extends: &["compile"],
    },
    Configuration {
        name: "default",
        extends: &["compile", "runtime"],
    },
    Configuration {
        name: "source",
        extends: &[],
    },
    Configuration {
        name: "javadoc",
        extends: &[],
    },
];

/// Look up a configuration by name.
pub fn configuration(name: &str) -> Option<&'static Configuration> {
    CONFIGURATIONS.iter().find(|c| c.name == name)
}

/// `name` plus every configuration it transitively extends, in discovery order.
pub fn extends_closure(name: &str) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    let mut stack: Vec<&'static str> = match configuration(name) {
        Some(c) => vec![c.name],
        None => return out,
    };
    while let Some(next) = stack.pop() {
        if out.contains(&next) {
            continue;
        }
        out.push(next);
        if let Some(c) = configuration(next) {
            stack.extend(c.extends.iter().rev());
        }
    }
    out
}

/// Whether a descriptor edge with Maven `scope` is reachable through
/// configuration `conf`. A missing scope means `compile`.
pub fn accepts_scope(conf: &str, scope: Option<&str>) -> bool {
    let scope = scope.unwrap_or("compile");
    if !matches!(scope, "compile" | "runtime") {
        return false;
    }
    extends_closure(conf).contains(&scope)
}

/// A pin forcing one module identity to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideMediator {
    pub module: ModuleId,
    pub revision: Revision,
}

impl OverrideMediator {
    pub fn new(module: ModuleId, revision: Revision) -> Self {
        Self { module, revision }
    }
}

/// A direct dependency attached to the root module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectDependency {
    pub dependency: Dependency,
    /// Root configuration the edge hangs off.
    pub configuration: &'static str,
    pub added_at: DateTime<Utc>,
}

/// Immutable view of the descriptor handed to one resolution.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSnapshot {
    pub dependencies: Vec<Dependency>,
    pub overrides: BTreeMap<ModuleId, Revision>,
    pub generation: u64,
}

/// The session's root module.
#[derive(Debug, Clone)]
pub struct VirtualModuleDescriptor {
    module: ModuleId,
    status: &'static str,
    dependencies: Vec<DirectDependency>,
    overrides: BTreeMap<ModuleId, Revision>,
    last_modified: DateTime<Utc>,
    generation: u64,
}

impl Default for VirtualModuleDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualModuleDescriptor {
    pub fn new() -> Self {
        Self {
            module: ModuleId::new(ROOT_GROUP, ROOT_ARTIFACT),
            status: ROOT_STATUS,
            dependencies: Vec::new(),
            overrides: BTreeMap::new(),
            last_modified: Utc::now(),
            generation: 0,
        }
    }

    pub fn module(&self) -> &ModuleId {
        &self.module
    }

    pub fn status(&self) -> &str {
        self.status
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Bumped on every mutation; lets callers tell whether anything changed
    /// since a given snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) -> DateTime<Utc> {
        // Keep the stamp monotonic even if the wall clock steps back.
        let now = Utc::now().max(self.last_modified);
        self.last_modified = now;
        self.generation += 1;
        now
    }

    /// Attach a dependency to the `default` configuration.
    ///
    /// Duplicate identities are kept; they compete at resolution time.
    pub fn add_direct_dependency(&mut self, dependency: Dependency) {
        let added_at = self.touch();
        self.dependencies.push(DirectDependency {
            dependency,
            configuration: DEFAULT_CONFIGURATION,
            added_at,
        });
    }

    /// Pin `mediator.module` to `mediator.revision`, replacing any earlier pin.
    ///
    /// Returns the replaced revision, if there was one.
    pub fn add_override(&mut self, mediator: OverrideMediator) -> Option<Revision> {
        self.touch();
        self.overrides.insert(mediator.module, mediator.revision)
    }

    pub fn override_for(&self, module: &ModuleId) -> Option<&Revision> {
        self.overrides.get(module)
    }

    pub fn dependencies(&self) -> &[DirectDependency] {
        &self.dependencies
    }

    /// Current overrides, ordered by module identity.
    pub fn overrides(&self) -> Vec<OverrideMediator> {
        self.overrides
            .iter()
            .map(|(m, r)| OverrideMediator::new(m.clone(), r.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> DescriptorSnapshot {
        DescriptorSnapshot {
            dependencies: self
                .dependencies
                .iter()
                .map(|d| d.dependency.clone())
                .collect(),
            overrides: self.overrides.clone(),
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_closure() {
        assert_eq!(extends_closure("default"), vec!["default", "compile", "master", "runtime"]);
        assert_eq!(extends_closure("runtime"), vec!["runtime", "compile", "master"]);
        assert_eq!(extends_closure("source"), vec!["source"]);
        assert!(extends_closure("test").is_empty());
    }

    #[test]
    fn test_scope_filter() {
        assert!(accepts_scope("default", None));
        assert!(accepts_scope("default", Some("compile")));
        assert!(accepts_scope("default", Some("runtime")));
        assert!(!accepts_scope("default", Some("test")));
        assert!(!accepts_scope("default", Some("provided")));
        assert!(!accepts_scope("master", Some("runtime")));
        assert!(!accepts_scope("javadoc", None));
    }

    #[test]
    fn test_direct_dependencies_keep_duplicates_and_stamp() {
        let mut desc = VirtualModuleDescriptor::new();
        assert_eq!(desc.module().to_string(), "notebook:session-kernel");
        assert_eq!(desc.status(), "integration");
        let before = desc.last_modified();

        desc.add_direct_dependency(Dependency::parse("g:a:1.0").unwrap());
        desc.add_direct_dependency(Dependency::parse("g:a:2.0").unwrap());
        assert_eq!(desc.dependencies().len(), 2);
        assert_eq!(desc.dependencies()[0].configuration, "default");
        assert!(desc.last_modified() >= before);
        assert_eq!(desc.generation(), 2);
    }

    #[test]
    fn test_override_last_write_wins() {
        let mut desc = VirtualModuleDescriptor::new();
        let module = ModuleId::new("g", "a");
        assert_eq!(
            desc.add_override(OverrideMediator::new(module.clone(), Revision::new("1.0"))),
            None
        );
        assert_eq!(
            desc.add_override(OverrideMediator::new(module.clone(), Revision::new("2.0"))),
            Some(Revision::new("1.0"))
        );
        assert_eq!(desc.override_for(&module), Some(&Revision::new("2.0")));
        assert_eq!(desc.overrides().len(), 1);
        assert_eq!(desc.snapshot().overrides.len(), 1);
    }
}
