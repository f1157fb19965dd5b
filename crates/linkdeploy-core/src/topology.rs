//! Declared component topology.
//!
//! A [`Topology`] is the immutable input of a run: the components to deploy,
//! in declaration order, and how each one refers to the others. Declaration
//! order is significant. It breaks ties in the deployment order and fixes
//! the order of the patch phase.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One deployable component and the addresses it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Unique name; also the artifact name passed to the resolver.
    pub name: String,
    /// Components whose addresses are passed to the constructor, in
    /// argument order.
    #[serde(default)]
    pub constructor_dependencies: Vec<String>,
    /// Dependencies satisfied after deployment by a patch call rather than
    /// at construction time. Constructor arguments naming one of these
    /// receive the placeholder address.
    #[serde(default)]
    pub deferred: Vec<String>,
    /// Patch method per deferred dependency; defaults to
    /// `update<Dependency>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patch_methods: BTreeMap<String, String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor_dependencies: Vec::new(),
            deferred: Vec::new(),
            patch_methods: BTreeMap::new(),
        }
    }

    /// Append constructor dependencies in argument order.
    pub fn needs(mut self, deps: &[&str]) -> Self {
        self.constructor_dependencies
            .extend(deps.iter().map(|d| d.to_string()));
        self
    }

    /// Mark `dependency` as patched after deployment.
    pub fn defers(mut self, dependency: &str) -> Self {
        self.deferred.push(dependency.to_string());
        self
    }

    pub fn with_patch_method(mut self, dependency: &str, method: &str) -> Self {
        self.patch_methods
            .insert(dependency.to_string(), method.to_string());
        self
    }

    pub fn is_deferred(&self, dependency: &str) -> bool {
        self.deferred.iter().any(|d| d == dependency)
    }

    /// Constructor dependencies that must be deployed first.
    pub fn forward_dependencies(&self) -> impl Iterator<Item = &str> {
        self.constructor_dependencies
            .iter()
            .map(String::as_str)
            .filter(|d| !self.is_deferred(d))
    }

    /// Method used to inject `dependency` after deployment.
    pub fn patch_method(&self, dependency: &str) -> String {
        if let Some(method) = self.patch_methods.get(dependency) {
            return method.clone();
        }
        let mut chars = dependency.chars();
        match chars.next() {
            Some(first) => format!("update{}{}", first.to_uppercase(), chars.as_str()),
            None => "update".to_string(),
        }
    }
}

/// The full set of components for one run, plus extra manifest aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub components: Vec<ComponentSpec>,
    /// Extra `alias → component` entries added to the manifest's alias
    /// table on top of the derived `<NAME>_ADDRESS` keys.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Topology {
    pub fn new(components: Vec<ComponentSpec>) -> Self {
        Self {
            components,
            aliases: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: &str, component: &str) -> Self {
        self.aliases.insert(alias.to_string(), component.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn from_json_str(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Load a topology from a JSON file.
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Ticketing topology: `Ticket` and `EventManager` reference each other,
    /// `Marketplace` needs both.
    ///
    /// `Ticket` is constructed with a placeholder event manager and patched
    /// through `updateEventManager` once `EventManager` exists.
    pub fn ticketing() -> Self {
        Topology::new(vec![
            ComponentSpec::new("Ticket")
                .needs(&["EventManager"])
                .defers("EventManager"),
            ComponentSpec::new("EventManager").needs(&["Ticket"]),
            ComponentSpec::new("Marketplace").needs(&["EventManager", "Ticket"]),
        ])
    }
}
