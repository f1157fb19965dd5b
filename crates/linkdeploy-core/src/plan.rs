//! Deployment planning.
//!
//! Components form a directed graph. An edge `A → B` means "B needs A's
//! address". Edges declared as deferred are left out of the graph: they are
//! satisfied after deployment by a patch call, which is how cyclic
//! references are broken. The remaining *forward* graph must be acyclic.
//!
//! The deployment order is computed with Kahn's algorithm. Among components
//! that are ready at the same time, the one declared first goes first, so a
//! topology always yields the same plan.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::PlanningError;
use crate::topology::Topology;

/// Where a constructor argument comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "component", rename_all = "snake_case")]
pub enum ArgSource {
    /// Address of a component deployed earlier in the plan.
    Deployed(String),
    /// The placeholder address; the real one is patched in later.
    Placeholder(String),
}

impl ArgSource {
    pub fn component(&self) -> &str {
        match self {
            ArgSource::Deployed(name) | ArgSource::Placeholder(name) => name,
        }
    }
}

/// One deploy step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 0-indexed position in the deployment order.
    pub position: usize,
    pub component: String,
    /// Constructor arguments, in argument order.
    pub constructor_args: Vec<ArgSource>,
}

/// A deferred edge to patch once both ends are deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPatch {
    /// Component receiving the call.
    pub source: String,
    /// Component whose address is injected.
    pub dependency: String,
    pub method: String,
}

/// A validated, ordered deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Deploy steps; every forward dependency precedes its dependents.
    pub steps: Vec<PlanStep>,
    /// Patch calls, in component declaration order then edge order.
    pub patches: Vec<PlannedPatch>,
    /// Extra manifest aliases carried over from the topology.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl DeploymentPlan {
    /// Component names in deployment order.
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.component.as_str()).collect()
    }

    pub fn step(&self, component: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.component == component)
    }

    /// Patches whose source is `component`.
    pub fn patches_for<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a PlannedPatch> {
        self.patches.iter().filter(move |p| p.source == component)
    }
}

/// Forward dependency graph over declared components.
///
/// Nodes are identified by declaration index. Edges are stored in both
/// directions: `upstream[i]` holds the components `i` needs at construction,
/// `downstream[i]` the components that need `i`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    upstream: Vec<BTreeSet<usize>>,
    downstream: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Build the forward graph, validating names and references.
    pub fn from_topology(topology: &Topology) -> Result<Self, PlanningError> {
        if topology.components.is_empty() {
            return Err(PlanningError::EmptyTopology);
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, spec) in topology.components.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(PlanningError::EmptyName);
            }
            if index.insert(spec.name.as_str(), i).is_some() {
                return Err(PlanningError::DuplicateComponent {
                    name: spec.name.clone(),
                });
            }
        }

        let count = topology.components.len();
        let mut upstream = vec![BTreeSet::new(); count];
        let mut downstream = vec![BTreeSet::new(); count];

        for (i, spec) in topology.components.iter().enumerate() {
            let declared = spec
                .constructor_dependencies
                .iter()
                .chain(spec.deferred.iter());
            for dep in declared {
                if !index.contains_key(dep.as_str()) {
                    return Err(PlanningError::UndeclaredDependency {
                        component: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for dep in spec.forward_dependencies() {
                let j = index[dep];
                upstream[i].insert(j);
                downstream[j].insert(i);
            }
        }

        Ok(Self {
            names: topology.components.iter().map(|c| c.name.clone()).collect(),
            upstream,
            downstream,
        })
    }

    /// Component names with dependencies before dependents.
    ///
    /// Returns [`PlanningError::DependencyCycle`] with one offending cycle
    /// when the forward graph is not a DAG.
    pub fn topological_order(&self) -> Result<Vec<String>, PlanningError> {
        let mut in_degree: Vec<usize> = self.upstream.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut sorted = Vec::with_capacity(self.names.len());
        while let Some(next) = ready.pop_first() {
            sorted.push(next);
            for &dependent in &self.downstream[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if sorted.len() != self.names.len() {
            let placed: HashSet<usize> = sorted.into_iter().collect();
            return Err(PlanningError::DependencyCycle {
                components: self.find_cycle(&placed),
            });
        }

        Ok(sorted.into_iter().map(|i| self.names[i].clone()).collect())
    }

    /// DFS over the components Kahn could not place. Every such component
    /// lies on or behind a cycle, so a cycle is always found.
    fn find_cycle(&self, placed: &HashSet<usize>) -> Vec<String> {
        let mut visited = HashSet::new();
        for start in (0..self.names.len()).filter(|i| !placed.contains(i)) {
            let mut path = Vec::new();
            if self.dfs_cycle(start, placed, &mut visited, &mut path) {
                return path.into_iter().map(|i| self.names[i].clone()).collect();
            }
        }
        self.names
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed.contains(i))
            .map(|(_, n)| n.clone())
            .collect()
    }

    fn dfs_cycle(
        &self,
        node: usize,
        placed: &HashSet<usize>,
        visited: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> bool {
        if let Some(pos) = path.iter().position(|&n| n == node) {
            path.drain(..pos);
            path.push(node);
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        path.push(node);
        for &dep in &self.upstream[node] {
            if placed.contains(&dep) {
                continue;
            }
            if self.dfs_cycle(dep, placed, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }
}

/// Validate `topology` and compute its deployment plan. No side effects.
pub fn plan(topology: &Topology) -> Result<DeploymentPlan, PlanningError> {
    let graph = DependencyGraph::from_topology(topology)?;

    for (alias, component) in &topology.aliases {
        if topology.get(component).is_none() {
            return Err(PlanningError::UndeclaredAlias {
                alias: alias.clone(),
                component: component.clone(),
            });
        }
    }

    let order = graph.topological_order()?;
    let steps = order
        .into_iter()
        .enumerate()
        .filter_map(|(position, name)| {
            let spec = topology.get(&name)?;
            let constructor_args = spec
                .constructor_dependencies
                .iter()
                .map(|dep| {
                    if spec.is_deferred(dep) {
                        ArgSource::Placeholder(dep.clone())
                    } else {
                        ArgSource::Deployed(dep.clone())
                    }
                })
                .collect();
            Some(PlanStep {
                position,
                component: name,
                constructor_args,
            })
        })
        .collect();

    let mut patches = Vec::new();
    for spec in &topology.components {
        let mut seen = HashSet::new();
        for dep in &spec.deferred {
            if seen.insert(dep.as_str()) {
                patches.push(PlannedPatch {
                    source: spec.name.clone(),
                    dependency: dep.clone(),
                    method: spec.patch_method(dep),
                });
            }
        }
    }

    Ok(DeploymentPlan {
        steps,
        patches,
        aliases: topology.aliases.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ComponentSpec;

    fn abc() -> Topology {
        Topology::new(vec![
            ComponentSpec::new("A"),
            ComponentSpec::new("B").needs(&["A", "C"]).defers("C"),
            ComponentSpec::new("C").needs(&["A", "B"]),
        ])
    }

    #[test]
    fn abc_plan_orders_and_patches() {
        let plan = plan(&abc()).unwrap();
        assert_eq!(plan.order(), vec!["A", "B", "C"]);
        assert_eq!(
            plan.step("B").unwrap().constructor_args,
            vec![
                ArgSource::Deployed("A".into()),
                ArgSource::Placeholder("C".into())
            ]
        );
        assert_eq!(
            plan.patches,
            vec![PlannedPatch {
                source: "B".into(),
                dependency: "C".into(),
                method: "updateC".into(),
            }]
        );
    }

    #[test]
    fn ready_components_follow_declaration_order() {
        let topology = Topology::new(vec![
            ComponentSpec::new("Zeta"),
            ComponentSpec::new("Alpha"),
            ComponentSpec::new("Mid").needs(&["Alpha"]),
            ComponentSpec::new("Beta"),
        ]);
        let plan = plan(&topology).unwrap();
        assert_eq!(plan.order(), vec!["Zeta", "Alpha", "Mid", "Beta"]);
    }

    #[test]
    fn dependency_declared_later_is_deployed_first() {
        let topology = Topology::new(vec![
            ComponentSpec::new("Consumer").needs(&["Provider"]),
            ComponentSpec::new("Provider"),
        ]);
        assert_eq!(
            plan(&topology).unwrap().order(),
            vec!["Provider", "Consumer"]
        );
    }

    #[test]
    fn forward_cycle_reports_path() {
        let topology = Topology::new(vec![
            ComponentSpec::new("A").needs(&["B"]),
            ComponentSpec::new("B").needs(&["A"]),
            ComponentSpec::new("C"),
        ]);
        let err = plan(&topology).unwrap_err();
        assert_eq!(
            err,
            PlanningError::DependencyCycle {
                components: vec!["A".into(), "B".into(), "A".into()]
            }
        );
    }

    #[test]
    fn self_reference_must_be_deferred() {
        let cyclic = Topology::new(vec![ComponentSpec::new("A").needs(&["A"])]);
        assert!(matches!(
            plan(&cyclic),
            Err(PlanningError::DependencyCycle { .. })
        ));

        let deferred = Topology::new(vec![ComponentSpec::new("A").needs(&["A"]).defers("A")]);
        let plan = plan(&deferred).unwrap();
        assert_eq!(plan.patches[0].method, "updateA");
    }

    #[test]
    fn rejects_invalid_topologies() {
        assert_eq!(
            plan(&Topology::new(vec![])).unwrap_err(),
            PlanningError::EmptyTopology
        );
        assert_eq!(
            plan(&Topology::new(vec![ComponentSpec::new("")])).unwrap_err(),
            PlanningError::EmptyName
        );
        assert_eq!(
            plan(&Topology::new(vec![ComponentSpec::new("A"), ComponentSpec::new("A")]))
                .unwrap_err(),
            PlanningError::DuplicateComponent { name: "A".into() }
        );
        assert_eq!(
            plan(&Topology::new(vec![ComponentSpec::new("A").defers("Ghost")])).unwrap_err(),
            PlanningError::UndeclaredDependency {
                component: "A".into(),
                dependency: "Ghost".into()
            }
        );
        assert_eq!(
            plan(&Topology::new(vec![ComponentSpec::new("A")]).with_alias("X", "Ghost"))
                .unwrap_err(),
            PlanningError::UndeclaredAlias {
                alias: "X".into(),
                component: "Ghost".into()
            }
        );
    }

    #[test]
    fn patches_follow_declaration_then_edge_order() {
        let topology = Topology::new(vec![
            ComponentSpec::new("Hub").defers("Right").defers("Left"),
            ComponentSpec::new("Left").needs(&["Hub"]),
            ComponentSpec::new("Right").needs(&["Hub"]).defers("Left"),
        ]);
        let plan = plan(&topology).unwrap();
        let patches: Vec<(&str, &str)> = plan
            .patches
            .iter()
            .map(|p| (p.source.as_str(), p.dependency.as_str()))
            .collect();
        assert_eq!(
            patches,
            vec![("Hub", "Right"), ("Hub", "Left"), ("Right", "Left")]
        );
    }

    #[test]
    fn ticketing_plan_matches_expected_order() {
        let plan = plan(&Topology::ticketing()).unwrap();
        assert_eq!(plan.order(), vec!["Ticket", "EventManager", "Marketplace"]);
        assert_eq!(plan.patches.len(), 1);
        assert_eq!(plan.patches[0].method, "updateEventManager");
    }
}
