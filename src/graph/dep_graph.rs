//! Package dependency graph built with petgraph
//!
//! - **Directed Graph**: `A → B` means "A depends on B"
//! - **Nodes**: discovered packages only; external dependencies never
//!   become edges
//! - **Levels**: minimal scheduling depths — a package sits at
//!   `1 + max(level of its internal deps)`, level 0 when it has none, so
//!   packages within one level can publish in parallel and level L+1 never
//!   starts before level L is done
//! - **Cycles**: fatal. A cycle has no valid publish order, so it is
//!   reported with its members rather than producing a partial ordering.

use crate::core::error::{ConvoyResult, GraphError};
use crate::workspace::{Package, normalize_name};
use petgraph::Direction;
use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Workspace-internal dependency graph.
pub struct PackageGraph {
  graph: DiGraph<String, ()>,
  name_to_node: HashMap<String, NodeIndex>,
}

impl PackageGraph {
  /// Build the graph over a discovered package set.
  ///
  /// Edges point from each package to the internal dependencies whose
  /// normalized names resolve within the same set; anything else is not an
  /// edge.
  pub fn build(packages: &[Package]) -> Self {
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();
    let mut normalized_to_name: HashMap<String, String> = HashMap::new();

    for package in packages {
      let idx = graph.add_node(package.name.clone());
      name_to_node.insert(package.name.clone(), idx);
      normalized_to_name.insert(normalize_name(&package.name), package.name.clone());
    }

    for package in packages {
      let from = name_to_node[&package.name];
      for dep in &package.internal_deps {
        if let Some(dep_name) = normalized_to_name.get(&normalize_name(dep)) {
          let to = name_to_node[dep_name];
          if from != to {
            graph.add_edge(from, to, ());
          }
        }
      }
    }

    Self { graph, name_to_node }
  }

  /// Topological levels, leaves first.
  ///
  /// Every internal dependency of a package in level L appears in some
  /// level < L, and the number of levels is minimal for that property.
  ///
  /// # Errors
  /// [`GraphError::Cycle`] naming the members when internal dependencies
  /// form a cycle.
  pub fn topo_levels(&self) -> ConvoyResult<Vec<Vec<String>>> {
    let order = match algo::toposort(&self.graph, None) {
      Ok(order) => order,
      Err(_) => {
        let mut members = self.cycle_members();
        members.sort();
        return Err(GraphError::Cycle { members }.into());
      }
    };

    // Process dependencies before dependents: edges point at dependencies,
    // so toposort yields dependents first and we walk it in reverse.
    let mut level_of: HashMap<NodeIndex, usize> = HashMap::new();
    for idx in order.into_iter().rev() {
      let level = self
        .graph
        .neighbors_directed(idx, Direction::Outgoing)
        .map(|dep| level_of[&dep] + 1)
        .max()
        .unwrap_or(0);
      level_of.insert(idx, level);
    }

    let depth = level_of.values().copied().max().map(|max| max + 1).unwrap_or(0);
    let mut levels = vec![Vec::new(); depth];
    for (idx, level) in level_of {
      levels[level].push(self.graph[idx].clone());
    }
    for level in &mut levels {
      level.sort();
    }

    Ok(levels)
  }

  /// All internal dependencies of `name`, direct and transitive.
  pub fn transitive_deps(&self, name: &str) -> HashSet<String> {
    let mut deps = HashSet::new();
    let Some(&start) = self.name_to_node.get(name) else {
      return deps;
    };

    let mut stack = vec![start];
    let mut visited = HashSet::new();
    while let Some(idx) = stack.pop() {
      if !visited.insert(idx) {
        continue;
      }
      for dep in self.graph.neighbors_directed(idx, Direction::Outgoing) {
        if dep != start {
          deps.insert(self.graph[dep].clone());
        }
        stack.push(dep);
      }
    }
    deps
  }

  /// Members of the strongly connected components that form cycles.
  fn cycle_members(&self) -> Vec<String> {
    let mut members = Vec::new();
    for component in algo::tarjan_scc(&self.graph) {
      let is_cycle = component.len() > 1
        || component
          .first()
          .is_some_and(|&idx| self.graph.find_edge(idx, idx).is_some());
      if is_cycle {
        members.extend(component.into_iter().map(|idx| self.graph[idx].clone()));
      }
    }
    members
  }
}
