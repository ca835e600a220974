//! Dependency ordering of extension descriptors.
//!
//! A stable topological sort: among extensions with no ordering constraint
//! between them, the input order wins. Dependencies on names absent from the
//! input are ignored, and cycles are broken by placing the earliest cycle
//! member first. Neither case is an error.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::descriptor::ExtensionDescriptor;

/// A dependency naming an extension that is not in the candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Label of the extension declaring the dependency.
    pub dependent: String,
    /// The unknown dependency name.
    pub dependency: String,
}

/// Result of ordering a candidate set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortPlan {
    /// Input indices in activation order.
    pub order: Vec<usize>,
    /// Dependencies that were ignored because their target is unknown.
    pub missing: Vec<MissingDependency>,
    /// Input indices placed ahead of unsatisfied dependencies to break a cycle.
    pub cycle_breaks: Vec<usize>,
}

impl SortPlan {
    /// Returns true if the order honors every declared dependency.
    pub fn is_strict(&self) -> bool {
        self.missing.is_empty() && self.cycle_breaks.is_empty()
    }
}

/// Compute the activation order for a candidate set.
pub fn plan(descriptors: &[ExtensionDescriptor]) -> SortPlan {
    let count = descriptors.len();

    let mut index_of: HashMap<&str, usize> = HashMap::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        if let Some(name) = descriptor.name() {
            index_of.entry(name).or_insert(i);
        }
    }

    let mut missing = Vec::new();
    let mut deps_of: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (i, descriptor) in descriptors.iter().enumerate() {
        let mut seen = HashSet::new();
        for dependency in &descriptor.dependencies {
            match index_of.get(dependency.as_str()) {
                Some(&j) if j != i => {
                    if seen.insert(j) {
                        deps_of[i].push(j);
                        dependents[j].push(i);
                    }
                }
                Some(_) => {}
                None => missing.push(MissingDependency {
                    dependent: descriptor.label(),
                    dependency: dependency.clone(),
                }),
            }
        }
    }

    let mut pending: Vec<usize> = deps_of.iter().map(Vec::len).collect();
    let mut placed = vec![false; count];
    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    let mut cycle_breaks = Vec::new();

    while order.len() < count {
        let next = match ready.pop_first() {
            Some(i) => i,
            None => {
                let breaker = (0..count)
                    .filter(|&i| !placed[i])
                    .find(|&i| on_cycle(i, &deps_of, &placed))
                    .or_else(|| (0..count).find(|&i| !placed[i]));
                match breaker {
                    Some(i) => {
                        cycle_breaks.push(i);
                        i
                    }
                    None => break,
                }
            }
        };

        placed[next] = true;
        order.push(next);

        for &dependent in &dependents[next] {
            if placed[dependent] {
                continue;
            }
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    SortPlan {
        order,
        missing,
        cycle_breaks,
    }
}

/// Order descriptors so that every dependency precedes its dependents.
pub fn sort(descriptors: Vec<ExtensionDescriptor>) -> Vec<ExtensionDescriptor> {
    let plan = plan(&descriptors);
    apply(descriptors, &plan)
}

/// Reorder descriptors according to a plan computed from the same input.
pub fn apply(descriptors: Vec<ExtensionDescriptor>, plan: &SortPlan) -> Vec<ExtensionDescriptor> {
    let mut slots: Vec<Option<ExtensionDescriptor>> = descriptors.into_iter().map(Some).collect();
    plan.order
        .iter()
        .filter_map(|&i| slots.get_mut(i).and_then(Option::take))
        .collect()
}

/// Whether `start` can reach itself through dependencies that are not yet placed.
fn on_cycle(start: usize, deps_of: &[Vec<usize>], placed: &[bool]) -> bool {
    let mut stack: Vec<usize> = deps_of[start].iter().copied().filter(|&d| !placed[d]).collect();
    let mut visited = HashSet::new();

    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        stack.extend(deps_of[node].iter().copied().filter(|&d| !placed[d]));
    }
    false
}
