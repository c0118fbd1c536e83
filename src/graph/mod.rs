//! Dependency Graph Builder
//!
//! Turns component metadata into a deterministic start order.
//!
//! ```text
//! descriptors (declaration order)
//!    ↓ validate: unique names, one provider per capability, no missing capability
//! requires → provides edges
//!    ↓ Kahn's algorithm, lowest declaration index first among ready nodes
//! total order  (or a cycle error naming every unresolved component)
//! ```

use crate::component::{CapabilityId, ComponentDescriptor};
use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct Node {
    name: String,
    provides: Vec<CapabilityId>,
    requires: Vec<CapabilityId>,
}

/// The provide/require relation among all registered components.
///
/// Built once from the assembly, consumed to produce the start order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    /// `dependencies[i]` holds the indices of the nodes `i` waits for.
    dependencies: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Build the graph from descriptors, in declaration order.
    pub fn from_descriptors(descriptors: &[ComponentDescriptor]) -> Result<Self> {
        Self::build(descriptors.iter().map(|d| {
            (
                d.name().to_string(),
                d.provides().to_vec(),
                d.requires().to_vec(),
            )
        }))
    }

    /// Build the graph from raw `(name, provides, requires)` triples.
    ///
    /// # Errors
    /// Duplicate component names, a capability with two providers, and a
    /// required capability nobody provides are all rejected here.
    pub fn build<I>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<CapabilityId>, Vec<CapabilityId>)>,
    {
        let nodes: Vec<Node> = nodes
            .into_iter()
            .map(|(name, provides, requires)| Node {
                name,
                provides,
                requires,
            })
            .collect();

        let mut names = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            if names.insert(node.name.as_str(), ()).is_some() {
                return Err(Error::DuplicateComponent {
                    name: node.name.clone(),
                });
            }
        }

        let mut providers: HashMap<&CapabilityId, usize> = HashMap::new();
        for (index, node) in nodes.iter().enumerate() {
            for capability in &node.provides {
                if let Some(&first) = providers.get(capability) {
                    if first != index {
                        return Err(Error::DuplicateProvider {
                            capability: capability.to_string(),
                            first: nodes[first].name.clone(),
                            second: node.name.clone(),
                        });
                    }
                    continue;
                }
                providers.insert(capability, index);
            }
        }

        let mut dependencies = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut waits_for = BTreeSet::new();
            for capability in &node.requires {
                let provider = providers.get(capability).ok_or_else(|| Error::MissingCapability {
                    component: node.name.clone(),
                    capability: capability.to_string(),
                })?;
                waits_for.insert(*provider);
            }
            dependencies.push(waits_for);
        }

        Ok(Self {
            nodes,
            dependencies,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Names of the components `name` waits for, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.nodes.iter().position(|n| n.name == name)?;
        Some(
            self.dependencies[index]
                .iter()
                .map(|&i| self.nodes[i].name.as_str())
                .collect(),
        )
    }

    /// Compute the start order as indices into the declaration list.
    ///
    /// Among simultaneously ready components the one declared first wins, so
    /// the order is identical across runs.
    pub fn order(&self) -> Result<Vec<usize>> {
        let count = self.nodes.len();
        let mut pending: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, waits_for) in self.dependencies.iter().enumerate() {
            for &provider in waits_for {
                dependents[provider].push(index);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            order.push(index);
            for &dependent in &dependents[index] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < count {
            let scheduled: BTreeSet<usize> = order.iter().copied().collect();
            let components = (0..count)
                .filter(|i| !scheduled.contains(i))
                .map(|i| self.nodes[i].name.clone())
                .collect();
            return Err(Error::DependencyCycle { components });
        }

        tracing::debug!(
            order = ?order.iter().map(|&i| self.nodes[i].name.as_str()).collect::<Vec<_>>(),
            "Resolved component start order"
        );
        Ok(order)
    }
}

/// Validate `descriptors` and return them rearranged into start order.
///
/// Nothing is constructed here; a failure leaves no side effects.
pub fn resolve_order(descriptors: Vec<ComponentDescriptor>) -> Result<Vec<ComponentDescriptor>> {
    let order = DependencyGraph::from_descriptors(&descriptors)?.order()?;
    let mut slots: Vec<Option<ComponentDescriptor>> = descriptors.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}
