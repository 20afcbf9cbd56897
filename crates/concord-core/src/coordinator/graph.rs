//! Agent dependency graph and level-ordered topological planning.
//!
//! An edge `A → B` means "B depends on A": A's published context feeds B,
//! so A must finish first. Ordering uses Kahn's algorithm one level at a
//! time; each level is sorted by agent id so plans are deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{AgentDescriptor, AgentId, ConcordError, Result};

/// Validated agent DAG.
#[derive(Debug, Clone)]
pub struct AgentGraph {
    agents: BTreeMap<AgentId, AgentDescriptor>,
    /// `dependency → dependents`
    downstream: BTreeMap<AgentId, BTreeSet<AgentId>>,
    layers: Vec<Vec<AgentId>>,
}

impl AgentGraph {
    /// Build and validate a graph. Rejects duplicates, dangling references and cycles.
    pub fn build(descriptors: &[AgentDescriptor]) -> Result<Self> {
        let mut agents = BTreeMap::new();
        for d in descriptors {
            if agents.insert(d.id.clone(), d.clone()).is_some() {
                return Err(ConcordError::DuplicateAgent(d.id.clone()));
            }
        }

        let mut downstream: BTreeMap<AgentId, BTreeSet<AgentId>> =
            agents.keys().map(|id| (id.clone(), BTreeSet::new())).collect();
        for d in agents.values() {
            for dep in &d.dependencies {
                match downstream.get_mut(dep) {
                    Some(dependents) => {
                        dependents.insert(d.id.clone());
                    }
                    None => {
                        return Err(ConcordError::UnknownDependency {
                            agent: d.id.clone(),
                            dependency: dep.clone(),
                        })
                    }
                }
            }
        }

        let layers = kahn_layers(&agents, &downstream)?;
        Ok(Self {
            agents,
            downstream,
            layers,
        })
    }

    /// Groups of mutually independent agents; every agent's dependencies
    /// live in strictly earlier layers.
    pub fn layers(&self) -> &[Vec<AgentId>] {
        &self.layers
    }

    /// Flattened topological order.
    pub fn order(&self) -> Vec<AgentId> {
        self.layers.iter().flatten().cloned().collect()
    }

    pub fn descriptor(&self, id: &AgentId) -> Option<&AgentDescriptor> {
        self.agents.get(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Position of `id` in the flattened order.
    pub fn position(&self, id: &AgentId) -> Option<usize> {
        self.layers.iter().flatten().position(|a| a == id)
    }

    /// Dependencies of `id` in topological order.
    pub fn ordered_dependencies(&self, id: &AgentId) -> Vec<AgentId> {
        let Some(descriptor) = self.agents.get(id) else {
            return Vec::new();
        };
        self.order()
            .into_iter()
            .filter(|a| descriptor.dependencies.contains(a))
            .collect()
    }

    /// Every agent reachable downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &AgentId) -> BTreeSet<AgentId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(dependents) = self.downstream.get(&current) {
                for d in dependents {
                    if seen.insert(d.clone()) {
                        stack.push(d.clone());
                    }
                }
            }
        }
        seen
    }
}

fn kahn_layers(
    agents: &BTreeMap<AgentId, AgentDescriptor>,
    downstream: &BTreeMap<AgentId, BTreeSet<AgentId>>,
) -> Result<Vec<Vec<AgentId>>> {
    let mut in_degree: BTreeMap<&AgentId, usize> = agents
        .values()
        .map(|d| (&d.id, d.dependencies.len()))
        .collect();

    let mut layers = Vec::new();
    let mut frontier: Vec<&AgentId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0;

    while !frontier.is_empty() {
        frontier.sort();
        let mut next = Vec::new();
        for id in &frontier {
            if let Some(dependents) = downstream.get(*id) {
                for d in dependents {
                    if let Some(deg) = in_degree.get_mut(d) {
                        *deg -= 1;
                        if *deg == 0 {
                            next.push(d);
                        }
                    }
                }
            }
        }
        visited += frontier.len();
        layers.push(frontier.iter().map(|id| (*id).clone()).collect());
        frontier = next;
    }

    if visited != agents.len() {
        let agents: Vec<AgentId> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id.clone())
            .collect();
        return Err(ConcordError::DependencyCycle { agents });
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(layer: &[AgentId]) -> Vec<&str> {
        layer.iter().map(AgentId::as_str).collect()
    }

    #[test]
    fn test_diamond_is_level_ordered() {
        let graph = AgentGraph::build(&[
            AgentDescriptor::new("synth").depends_on("left").depends_on("right"),
            AgentDescriptor::new("right").depends_on("root"),
            AgentDescriptor::new("left").depends_on("root"),
            AgentDescriptor::new("root"),
        ])
        .unwrap();
        let layers = graph.layers();
        assert_eq!(layers.len(), 3);
        assert_eq!(ids(&layers[0]), vec!["root"]);
        assert_eq!(ids(&layers[1]), vec!["left", "right"]);
        assert_eq!(ids(&layers[2]), vec!["synth"]);
        assert_eq!(
            graph.ordered_dependencies(&AgentId::new("synth")),
            vec![AgentId::new("left"), AgentId::new("right")]
        );
        assert_eq!(graph.transitive_dependents(&AgentId::new("root")).len(), 3);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let err = AgentGraph::build(&[
            AgentDescriptor::new("a").depends_on("c"),
            AgentDescriptor::new("b").depends_on("a"),
            AgentDescriptor::new("c").depends_on("b"),
            AgentDescriptor::new("free"),
        ])
        .unwrap_err();
        match err {
            ConcordError::DependencyCycle { agents } => {
                assert_eq!(agents.len(), 3);
                assert!(!agents.contains(&AgentId::new("free")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = AgentGraph::build(&[AgentDescriptor::new("a").depends_on("a")]).unwrap_err();
        assert!(matches!(err, ConcordError::DependencyCycle { .. }));
    }

    #[test]
    fn test_unknown_and_duplicate_agents_are_rejected() {
        assert!(matches!(
            AgentGraph::build(&[AgentDescriptor::new("a").depends_on("ghost")]),
            Err(ConcordError::UnknownDependency { .. })
        ));
        assert!(matches!(
            AgentGraph::build(&[AgentDescriptor::new("a"), AgentDescriptor::new("a")]),
            Err(ConcordError::DuplicateAgent(_))
        ));
    }
}
